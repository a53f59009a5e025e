//! In-memory mirror backend.
//!
//! Used by tests and by hosts without persistent storage. All data is lost
//! when dropped.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::ops::MirrorStore;
use crate::types::{Collection, StoredRecord, WriteBatch, WriteOp};
use crate::StoreResult;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<Collection, BTreeMap<String, StoredRecord>>,
    sequences: HashMap<Collection, u64>,
}

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Put { collection, record } => {
                self.rows
                    .entry(collection)
                    .or_default()
                    .insert(record.key.clone(), record);
            }
            WriteOp::Delete { collection, key } => {
                if let Some(rows) = self.rows.get_mut(&collection) {
                    rows.remove(&key);
                }
            }
        }
    }
}

/// In-memory mirror store.
///
/// Thread-safe via an internal `RwLock`. A batch is applied under a single
/// write lock, so readers never observe half of it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.tables
            .read()
            .rows
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(&collection)
            .and_then(|rows| rows.get(key))
            .map(|record| record.body.clone()))
    }

    async fn get_all(&self, collection: Collection) -> StoreResult<Vec<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(&collection)
            .map(|rows| rows.values().map(|r| r.body.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &str,
    ) -> StoreResult<Vec<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(&collection)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.indexed_as(index, value))
                    .map(|r| r.body.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn next_id(&self, collection: Collection) -> StoreResult<u64> {
        let mut tables = self.tables.write();
        let next = tables.sequences.entry(collection).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.write();
        for op in batch.into_ops() {
            tables.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, body: &str) -> StoredRecord {
        StoredRecord::new(key, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get(Collection::Notes, "nope").await.unwrap(), None);
        assert!(store.get_all(Collection::Notes).await.unwrap().is_empty());
        store.delete(Collection::Notes, "nope").await.unwrap();
    }

    #[tokio::test]
    async fn put_replaces_and_reindexes() {
        let store = MemoryStore::new();
        store
            .put(Collection::Notes, record("n1", "a").with_index("folder_id", "f1"))
            .await
            .unwrap();
        store
            .put(Collection::Notes, record("n1", "b").with_index("folder_id", "f2"))
            .await
            .unwrap();

        assert_eq!(store.len(Collection::Notes), 1);
        assert!(store
            .get_all_by_index(Collection::Notes, "folder_id", "f1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_all_by_index(Collection::Notes, "folder_id", "f2")
                .await
                .unwrap(),
            vec![b"b".to_vec()]
        );
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = MemoryStore::new();
        store.put(Collection::Notes, record("k", "note")).await.unwrap();
        store.put(Collection::Folders, record("k", "folder")).await.unwrap();
        assert_eq!(
            store.get(Collection::Folders, "k").await.unwrap(),
            Some(b"folder".to_vec())
        );
    }

    #[tokio::test]
    async fn sequences_are_per_collection_and_never_reused() {
        let store = MemoryStore::new();
        assert_eq!(store.next_id(Collection::Outbox).await.unwrap(), 1);
        assert_eq!(store.next_id(Collection::Outbox).await.unwrap(), 2);
        assert_eq!(store.next_id(Collection::History).await.unwrap(), 1);
        store.put(Collection::Outbox, record("x", "")).await.unwrap();
        store.delete(Collection::Outbox, "x").await.unwrap();
        assert_eq!(store.next_id(Collection::Outbox).await.unwrap(), 3);
    }
}
