//! The remote authoritative service.
//!
//! [`RemoteService`] is the engine's only view of the server. Two
//! implementations ship with the crate:
//!
//! - [`HttpRemote`] - JSON over HTTP with a bearer credential
//! - [`MemoryRemote`] - in-process service for tests and demos
//!
//! Every response carries the server's `updated_at` for the entity, which the
//! engine treats as an opaque version marker.

mod error;
mod http;
mod memory;

pub use error::RemoteError;
pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quire_types::{
    FolderDraft, FolderId, FolderPatch, FolderRecord, NoteDraft, NoteId, NotePatch, NoteRecord,
    Sealed, SettingsBlob, SettingsRecord, Timestamp,
};

pub type RemoteResult<T> = Result<T, RemoteError>;

// ============================================================================
// Wire records
// ============================================================================

/// A note as the server sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: NoteId,
    pub folder_id: FolderId,
    pub content: Sealed,
    pub word_count: u32,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl RemoteNote {
    /// The mirror row for this note when nothing local is pending.
    pub fn into_record(self) -> NoteRecord {
        NoteRecord {
            id: self.id,
            folder_id: self.folder_id,
            content: self.content,
            word_count: self.word_count,
            server_updated_at: Some(self.updated_at),
            locally_edited_at: None,
            dirty: false,
            deleted_at: self.deleted_at,
        }
    }
}

/// A folder as the server sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: FolderId,
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    pub name: Sealed,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub goal_word_count: Option<u32>,
    #[serde(default)]
    pub order: i64,
    pub updated_at: Timestamp,
}

impl RemoteFolder {
    pub fn into_record(self) -> FolderRecord {
        FolderRecord {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            is_default: self.is_default,
            goal_word_count: self.goal_word_count,
            order: self.order,
            server_updated_at: Some(self.updated_at),
        }
    }
}

/// The account's settings blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub blob: SettingsBlob,
    pub updated_at: Timestamp,
}

impl RemoteSettings {
    pub fn into_record(self) -> SettingsRecord {
        SettingsRecord {
            blob: self.blob,
            updated_at: self.updated_at,
        }
    }
}

/// Filter for listing notes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    /// List trashed notes instead of live ones.
    #[serde(default)]
    pub trashed: bool,
}

impl NoteQuery {
    pub fn matches(&self, note: &RemoteNote) -> bool {
        self.folder_id.as_ref().is_none_or(|f| &note.folder_id == f)
            && note.deleted_at.is_some() == self.trashed
    }
}

// ============================================================================
// RemoteService
// ============================================================================

/// Operations the authoritative service offers.
///
/// Creates and updates are expected to be idempotent by id: the engine
/// delivers at least once.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list_notes(&self, query: &NoteQuery) -> RemoteResult<Vec<RemoteNote>>;

    async fn get_note(&self, id: &NoteId) -> RemoteResult<RemoteNote>;

    async fn create_note(&self, draft: &NoteDraft) -> RemoteResult<RemoteNote>;

    async fn update_note(&self, id: &NoteId, patch: &NotePatch) -> RemoteResult<RemoteNote>;

    async fn soft_delete_note(&self, id: &NoteId) -> RemoteResult<RemoteNote>;

    async fn restore_note(&self, id: &NoteId) -> RemoteResult<RemoteNote>;

    async fn list_folders(&self) -> RemoteResult<Vec<RemoteFolder>>;

    /// Create a folder. The server issues the id.
    async fn create_folder(&self, draft: &FolderDraft) -> RemoteResult<RemoteFolder>;

    async fn update_folder(&self, id: &FolderId, patch: &FolderPatch)
    -> RemoteResult<RemoteFolder>;

    /// Delete a folder. The server moves its notes to the default folder.
    async fn delete_folder(&self, id: &FolderId) -> RemoteResult<()>;

    async fn get_settings(&self) -> RemoteResult<RemoteSettings>;

    async fn update_settings(&self, blob: &SettingsBlob) -> RemoteResult<RemoteSettings>;
}
