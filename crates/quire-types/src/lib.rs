//! Shared record and identifier types for quire.
//!
//! This is the leaf crate: typed ids, the mirror record shapes, opaque sealed
//! payloads and the outbox mutation union. It has no internal quire
//! dependencies.
//!
//! |----------------------|----------------------------------------------|
//! | Type                 | Purpose                                      |
//! |----------------------|----------------------------------------------|
//! | [`NoteRecord`]       | A mirrored note (sealed body + sync state)   |
//! | [`FolderRecord`]     | A mirrored folder                            |
//! | [`SettingsRecord`]   | The settings singleton                       |
//! | [`HistorySnapshot`]  | Append-only copy of sealed content           |
//! | [`OutboxEntry`]      | A queued mutation awaiting replay            |
//! | [`Mutation`]         | Tagged union of every outbox mutation kind   |
//! | [`FolderId`]         | Server-issued or temporary folder id         |
//! | [`Sealed`]           | Opaque ciphertext + nonce                    |
//! |----------------------|----------------------------------------------|

pub mod ids;
pub mod mutation;
pub mod records;
pub mod sealed;

pub use ids::{EntityKey, FolderId, NoteId, TEMP_ID_PREFIX};
pub use mutation::{FolderDraft, FolderPatch, Mutation, MutationKind, NoteDraft, NotePatch};
pub use records::{
    EntityKind, FolderRecord, HistorySnapshot, NoteRecord, OutboxEntry, SETTINGS_KEY,
    SettingsRecord, SnapshotReason, Timestamp, now_millis,
};
pub use sealed::{Sealed, SettingsBlob};
