//! SQLite mirror backend.
//!
//! Every collection shares one `records` table keyed by `(collection, key)`.
//! Index entries live in `record_indexes` and are rewritten on every put.
//! Sequences persist in `sequences`, so ids stay monotonic across reopen.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::ops::MirrorStore;
use crate::types::{Collection, WriteBatch, WriteOp};
use crate::StoreResult;

const SCHEMA: &str = r#"
-- Record bodies (JSON), one row per (collection, key)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    body BLOB NOT NULL,
    PRIMARY KEY (collection, key)
);

-- Secondary index entries (possibly several per record)
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    index_name TEXT NOT NULL,
    value TEXT NOT NULL,
    FOREIGN KEY (collection, key) REFERENCES records(collection, key) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_record_indexes_lookup
    ON record_indexes(collection, index_name, value);
CREATE INDEX IF NOT EXISTS idx_record_indexes_owner
    ON record_indexes(collection, key);

-- Per-collection monotonic sequences
CREATE TABLE IF NOT EXISTS sequences (
    collection TEXT PRIMARY KEY,
    last_id INTEGER NOT NULL
);
"#;

/// SQLite-backed mirror store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "opened sqlite mirror");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn apply_op(tx: &rusqlite::Transaction<'_>, op: &WriteOp) -> rusqlite::Result<()> {
    match op {
        WriteOp::Put { collection, record } => {
            let collection = collection.as_str();
            tx.execute(
                "DELETE FROM record_indexes WHERE collection = ?1 AND key = ?2",
                params![collection, record.key],
            )?;
            tx.execute(
                "INSERT INTO records (collection, key, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
                params![collection, record.key, record.body],
            )?;
            // Index rows reference the record row, so they go in after it.
            for (index, value) in &record.indexes {
                tx.execute(
                    "INSERT INTO record_indexes (collection, key, index_name, value)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![collection, record.key, index, value],
                )?;
            }
        }
        WriteOp::Delete { collection, key } => {
            let collection = collection.as_str();
            tx.execute(
                "DELETE FROM record_indexes WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
            tx.execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl MirrorStore for SqliteStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let body = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    async fn get_all(&self, collection: Collection) -> StoreResult<Vec<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<Vec<u8>>>>()?)
    }

    async fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &str,
    ) -> StoreResult<Vec<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT r.body FROM records r
             JOIN record_indexes i ON i.collection = r.collection AND i.key = r.key
             WHERE i.collection = ?1 AND i.index_name = ?2 AND i.value = ?3
             ORDER BY r.key",
        )?;
        let rows = stmt.query_map(params![collection.as_str(), index, value], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<Vec<u8>>>>()?)
    }

    async fn next_id(&self, collection: Collection) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            "INSERT INTO sequences (collection, last_id) VALUES (?1, 1)
             ON CONFLICT(collection) DO UPDATE SET last_id = last_id + 1
             RETURNING last_id",
            params![collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(id as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in batch.ops() {
            apply_op(&tx, op)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoredRecord;

    #[tokio::test]
    async fn put_get_and_index() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(
                Collection::Notes,
                StoredRecord::new("n1", b"one".to_vec()).with_index("folder_id", "f1"),
            )
            .await
            .unwrap();
        store
            .put(
                Collection::Notes,
                StoredRecord::new("n2", b"two".to_vec()).with_index("folder_id", "f2"),
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(Collection::Notes, "n1").await.unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(store.get(Collection::Folders, "n1").await.unwrap(), None);
        assert_eq!(
            store
                .get_all_by_index(Collection::Notes, "folder_id", "f2")
                .await
                .unwrap(),
            vec![b"two".to_vec()]
        );
    }

    #[tokio::test]
    async fn reput_moves_index_entries() {
        let store = SqliteStore::in_memory().unwrap();
        let first = StoredRecord::new("n1", b"a".to_vec()).with_index("folder_id", "f1");
        let second = StoredRecord::new("n1", b"b".to_vec()).with_index("folder_id", "f2");
        store.put(Collection::Notes, first).await.unwrap();
        store.put(Collection::Notes, second).await.unwrap();

        assert!(store
            .get_all_by_index(Collection::Notes, "folder_id", "f1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.get_all(Collection::Notes).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Collection::Folders, StoredRecord::new("f1", b"keep".to_vec()))
            .await
            .unwrap();

        // Drop the index table so the second op of the batch fails mid-way.
        store
            .conn
            .lock()
            .execute_batch("DROP TABLE record_indexes;")
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.put(Collection::Notes, StoredRecord::new("n1", b"x".to_vec()));
        assert!(store.commit(batch).await.is_err());

        store.conn.lock().execute_batch(SCHEMA).unwrap();
        assert_eq!(store.get(Collection::Notes, "n1").await.unwrap(), None);
        assert_eq!(
            store.get(Collection::Folders, "f1").await.unwrap(),
            Some(b"keep".to_vec())
        );
    }

    #[tokio::test]
    async fn index_rows_need_their_record() {
        let store = SqliteStore::in_memory().unwrap();
        let enabled: i64 = store
            .conn
            .lock()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);

        let orphan = store.conn.lock().execute(
            "INSERT INTO record_indexes (collection, key, index_name, value)
             VALUES ('notes', 'missing', 'folder_id', 'f1')",
            [],
        );
        assert!(orphan.is_err());

        let dir = tempfile::tempdir().unwrap();
        let on_disk = SqliteStore::open(dir.path().join("mirror.db")).unwrap();
        let enabled: i64 = on_disk
            .conn
            .lock()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
