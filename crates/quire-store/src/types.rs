//! Raw storage types shared by every backend.

use std::fmt;

/// A named record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Notes,
    Folders,
    Settings,
    Outbox,
    History,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Notes,
        Collection::Folders,
        Collection::Settings,
        Collection::Outbox,
        Collection::History,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::Folders => "folders",
            Collection::Settings => "settings",
            Collection::Outbox => "outbox",
            Collection::History => "history",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encoded record ready for a backend.
///
/// `indexes` holds `(index name, value)` pairs. One index may appear several
/// times with different values (a multi-entry index); duplicates are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub indexes: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl StoredRecord {
    pub fn new(key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            indexes: Vec::new(),
            body,
        }
    }

    pub fn with_index(mut self, index: &'static str, value: impl Into<String>) -> Self {
        let entry = (index, value.into());
        if !self.indexes.contains(&entry) {
            self.indexes.push(entry);
        }
        self
    }

    /// Whether this record carries `value` under `index`.
    pub fn indexed_as(&self, index: &str, value: &str) -> bool {
        self.indexes.iter().any(|(i, v)| *i == index && v == value)
    }
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        collection: Collection,
        record: StoredRecord,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// A group of writes applied atomically: all of them or none.
///
/// Ops are applied in insertion order, so a delete followed by a put of the
/// same key leaves the put in place.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, collection: Collection, record: StoredRecord) -> &mut Self {
        self.ops.push(WriteOp::Put { collection, record });
        self
    }

    pub fn delete(&mut self, collection: Collection, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection,
            key: key.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_index_drops_duplicates() {
        let record = StoredRecord::new("k", vec![])
            .with_index("entity", "note:a")
            .with_index("entity", "folder:b")
            .with_index("entity", "note:a");
        assert_eq!(record.indexes.len(), 2);
        assert!(record.indexed_as("entity", "folder:b"));
        assert!(!record.indexed_as("entity", "folder:c"));
    }

    #[test]
    fn batch_preserves_order() {
        let mut batch = WriteBatch::new();
        batch
            .delete(Collection::Folders, "tmp-1")
            .put(Collection::Folders, StoredRecord::new("srv-1", vec![]));
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.ops()[0], WriteOp::Delete { .. }));
        assert!(matches!(batch.ops()[1], WriteOp::Put { .. }));
    }
}
