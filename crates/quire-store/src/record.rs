//! Typed records and how each maps onto a collection.

use serde::Serialize;
use serde::de::DeserializeOwned;

use quire_types::{
    FolderRecord, HistorySnapshot, NoteRecord, OutboxEntry, SETTINGS_KEY, SettingsRecord,
};

use crate::types::{Collection, StoredRecord};
use crate::{StoreError, StoreResult};

/// Notes are indexed by the folder they live in.
pub const FOLDER_INDEX: &str = "folder_id";
/// Folders are indexed on the default flag (only the inbox carries a value).
pub const DEFAULT_INDEX: &str = "default";
/// Outbox and history rows are indexed by every entity they touch.
pub const ENTITY_INDEX: &str = "entity";

/// A type that lives in one mirror collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    /// Primary key.
    fn key(&self) -> String;

    /// `(index, value)` pairs to maintain for this record.
    fn indexes(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Key for rows ordered by a store-assigned sequence number.
///
/// Zero padded so that key order equals numeric order.
pub fn sequence_key(id: u64) -> String {
    format!("{id:020}")
}

pub(crate) fn encode<R: Record>(record: &R) -> StoreResult<StoredRecord> {
    let body = serde_json::to_vec(record).map_err(|source| StoreError::Serialization {
        collection: R::COLLECTION.as_str(),
        source,
    })?;
    let stored = record
        .indexes()
        .into_iter()
        .fold(StoredRecord::new(record.key(), body), |stored, (index, value)| {
            stored.with_index(index, value)
        });
    Ok(stored)
}

pub(crate) fn decode<R: Record>(body: &[u8]) -> StoreResult<R> {
    serde_json::from_slice(body).map_err(|source| StoreError::Serialization {
        collection: R::COLLECTION.as_str(),
        source,
    })
}

impl Record for NoteRecord {
    const COLLECTION: Collection = Collection::Notes;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        vec![(FOLDER_INDEX, self.folder_id.to_string())]
    }
}

impl Record for FolderRecord {
    const COLLECTION: Collection = Collection::Folders;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        if self.is_default {
            vec![(DEFAULT_INDEX, "true".to_string())]
        } else {
            Vec::new()
        }
    }
}

impl Record for SettingsRecord {
    const COLLECTION: Collection = Collection::Settings;

    fn key(&self) -> String {
        SETTINGS_KEY.to_string()
    }
}

impl Record for OutboxEntry {
    const COLLECTION: Collection = Collection::Outbox;

    fn key(&self) -> String {
        sequence_key(self.id)
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        self.entities()
            .iter()
            .map(|key| (ENTITY_INDEX, key.index_value()))
            .collect()
    }
}

impl Record for HistorySnapshot {
    const COLLECTION: Collection = Collection::History;

    fn key(&self) -> String {
        sequence_key(self.id)
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        vec![(ENTITY_INDEX, self.entity_index())]
    }
}
