//! Mirror store operations trait.
//!
//! The trait works on encoded records so it stays object safe; the typed
//! surface lives in [`Mirror`](crate::Mirror). Every backend must behave
//! identically so callers never care which one they hold.

use async_trait::async_trait;

use crate::types::{Collection, StoredRecord, WriteBatch};
use crate::StoreResult;

/// Core mirror store trait.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Fetch one record body. A missing key is `Ok(None)`, never an error.
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Fetch every record body in a collection, in key order.
    async fn get_all(&self, collection: Collection) -> StoreResult<Vec<Vec<u8>>>;

    /// Fetch every record carrying `value` under `index`, in key order.
    async fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &str,
    ) -> StoreResult<Vec<Vec<u8>>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Allocate the next id of a per-collection monotonic sequence.
    ///
    /// Ids start at 1 and are never handed out twice, even when the records
    /// that used them have since been deleted.
    async fn next_id(&self, collection: Collection) -> StoreResult<u64>;

    /// Apply a batch of puts and deletes atomically.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Insert or replace one record.
    async fn put(&self, collection: Collection, record: StoredRecord) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(collection, record);
        self.commit(batch).await
    }

    /// Remove one record. Removing a missing key is a no-op.
    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, key);
        self.commit(batch).await
    }
}
