//! Mirror record types.
//!
//! These are the rows of the local mirror: notes, folders, the settings
//! singleton, history snapshots and queued outbox entries. Server timestamps
//! are opaque version markers; they are compared for equality only.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{EntityKey, FolderId, NoteId};
use crate::mutation::Mutation;
use crate::sealed::{Sealed, SettingsBlob};

/// Unix milliseconds.
pub type Timestamp = u64;

/// Key of the settings singleton.
pub const SETTINGS_KEY: &str = "singleton";

/// A note as mirrored locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: NoteId,
    pub folder_id: FolderId,
    pub content: Sealed,
    pub word_count: u32,
    /// Last known authoritative timestamp (None = never confirmed by the server).
    pub server_updated_at: Option<Timestamp>,
    /// When the last unsynced local edit happened.
    pub locally_edited_at: Option<Timestamp>,
    /// Local content diverges from the last known server state.
    pub dirty: bool,
    pub deleted_at: Option<Timestamp>,
}

impl NoteRecord {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Mark this record as confirmed by the server at `updated_at`.
    pub fn confirm(&mut self, updated_at: Timestamp) {
        self.server_updated_at = Some(updated_at);
        self.locally_edited_at = None;
        self.dirty = false;
    }
}

/// A folder as mirrored locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: FolderId,
    pub parent_id: Option<FolderId>,
    pub name: Sealed,
    /// The account's inbox. Exactly one exists and it is never deleted.
    pub is_default: bool,
    pub goal_word_count: Option<u32>,
    pub order: i64,
    pub server_updated_at: Option<Timestamp>,
}

/// The settings singleton.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub blob: SettingsBlob,
    pub updated_at: Timestamp,
}

/// Which kind of entity a history snapshot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum EntityKind {
    Note,
    Folder,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::Folder => "folder",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a history snapshot was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum SnapshotReason {
    /// A queued update overwrote a concurrent remote change.
    Conflict,
    Manual,
    Autosave,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Conflict => "conflict",
            SnapshotReason::Manual => "manual",
            SnapshotReason::Autosave => "autosave",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

impl std::fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only copy of an entity's sealed content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub id: u64,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub snapshot: Sealed,
    pub created_at: Timestamp,
    pub reason: SnapshotReason,
}

impl HistorySnapshot {
    /// Index value shared with [`EntityKey::index_value`].
    pub fn entity_index(&self) -> String {
        format!("{}:{}", self.entity_kind, self.entity_id)
    }
}

/// A queued, not-yet-confirmed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic, assigned by the store.
    pub id: u64,
    pub mutation: Mutation,
    /// Server timestamp known when an update was enqueued (updates only).
    pub base_server_updated_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl OutboxEntry {
    /// Flush order: `created_at`, then store-assigned id.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.created_at, self.id)
    }

    pub fn entities(&self) -> Vec<EntityKey> {
        self.mutation.entities()
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_clears_local_edit_state() {
        let mut note = NoteRecord {
            id: NoteId::new("n1"),
            folder_id: FolderId::new("inbox"),
            content: Sealed::new(b"c".to_vec(), b"n".to_vec()),
            word_count: 1,
            server_updated_at: None,
            locally_edited_at: Some(5),
            dirty: true,
            deleted_at: None,
        };
        note.confirm(42);
        assert_eq!(note.server_updated_at, Some(42));
        assert_eq!(note.locally_edited_at, None);
        assert!(!note.dirty);
    }

    #[test]
    fn snapshot_reason_strings() {
        assert_eq!(SnapshotReason::Conflict.as_str(), "conflict");
        assert_eq!(SnapshotReason::from_str("AUTOSAVE"), Some(SnapshotReason::Autosave));
        assert_eq!(SnapshotReason::from_str("nope"), None);
        assert_eq!(
            serde_json::to_string(&SnapshotReason::Manual).unwrap(),
            "\"manual\""
        );
    }

    #[test]
    fn history_entity_index_matches_entity_key() {
        let snap = HistorySnapshot {
            id: 1,
            entity_kind: EntityKind::Note,
            entity_id: "n1".into(),
            snapshot: Sealed::default(),
            created_at: 0,
            reason: SnapshotReason::Manual,
        };
        assert_eq!(
            snap.entity_index(),
            EntityKey::Note(NoteId::new("n1")).index_value()
        );
    }
}
