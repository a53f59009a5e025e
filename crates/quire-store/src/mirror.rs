//! Typed façade over a [`MirrorStore`].

use std::sync::Arc;

use crate::backends::MemoryStore;
use crate::ops::MirrorStore;
use crate::record::{Record, decode, encode};
use crate::types::WriteBatch;
use crate::StoreResult;

/// Shared, typed handle to the local mirror.
///
/// Cloning is cheap; all clones see the same backend.
#[derive(Clone)]
pub struct Mirror {
    store: Arc<dyn MirrorStore>,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror").finish_non_exhaustive()
    }
}

impl Mirror {
    pub fn new(store: impl MirrorStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn MirrorStore>) -> Self {
        Self { store }
    }

    /// A mirror backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// The underlying backend.
    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    pub async fn get<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
        match self.store.get(R::COLLECTION, key).await? {
            Some(body) => decode(&body).map(Some),
            None => Ok(None),
        }
    }

    pub async fn all<R: Record>(&self) -> StoreResult<Vec<R>> {
        let bodies = self.store.get_all(R::COLLECTION).await?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    pub async fn by_index<R: Record>(&self, index: &str, value: &str) -> StoreResult<Vec<R>> {
        let bodies = self.store.get_all_by_index(R::COLLECTION, index, value).await?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    pub async fn put<R: Record>(&self, record: &R) -> StoreResult<()> {
        let stored = encode(record)?;
        self.store.put(R::COLLECTION, stored).await
    }

    pub async fn delete<R: Record>(&self, key: &str) -> StoreResult<()> {
        self.store.delete(R::COLLECTION, key).await
    }

    /// Allocate the next sequence number for `R`'s collection.
    pub async fn next_id<R: Record>(&self) -> StoreResult<u64> {
        self.store.next_id(R::COLLECTION).await
    }

    /// Start an atomic multi-collection batch.
    pub fn batch(&self) -> MirrorBatch {
        MirrorBatch::default()
    }

    pub async fn commit(&self, batch: MirrorBatch) -> StoreResult<()> {
        if batch.inner.is_empty() {
            return Ok(());
        }
        self.store.commit(batch.inner).await
    }
}

/// Typed builder for a [`WriteBatch`].
#[derive(Debug, Default)]
pub struct MirrorBatch {
    inner: WriteBatch,
}

impl MirrorBatch {
    pub fn put<R: Record>(&mut self, record: &R) -> StoreResult<&mut Self> {
        let stored = encode(record)?;
        self.inner.put(R::COLLECTION, stored);
        Ok(self)
    }

    pub fn delete<R: Record>(&mut self, key: impl Into<String>) -> &mut Self {
        self.inner.delete(R::COLLECTION, key);
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
