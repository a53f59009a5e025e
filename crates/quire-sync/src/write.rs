//! Optimistic writes.
//!
//! Each write first tries the remote directly. If that succeeds the
//! authoritative result is written through to the mirror. If the remote is
//! unreachable the mutation is applied to the mirror optimistically and queued
//! in the outbox, in the same store transaction, and the caller gets a result
//! marked `offline`.
//!
//! A write skips the direct call and goes straight to the outbox when an
//! earlier queued entry touches the same entity, or when it references a
//! folder that only has a temporary id. Otherwise a later write could reach
//! the server before an earlier one.
//!
//! Definitive refusals from the server are returned as errors and nothing is
//! queued.

use std::future::Future;

use tracing::{debug, info};

use quire_store::{MirrorBatch, StoreResult};
use quire_types::{
    FolderDraft, FolderId, FolderPatch, FolderRecord, Mutation, NoteDraft, NoteId,
    NotePatch, NoteRecord, OutboxEntry, Sealed, SettingsBlob, SettingsRecord, Timestamp,
    now_millis,
};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::reconcile::cascade_folder_delete;
use crate::remote::{RemoteError, RemoteResult};

/// Result of a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome<T> {
    pub value: T,
    /// The write was applied locally and queued, not yet confirmed.
    pub offline: bool,
}

impl<T> WriteOutcome<T> {
    fn confirmed(value: T) -> Self {
        Self {
            value,
            offline: false,
        }
    }

    fn queued(value: T) -> Self {
        Self {
            value,
            offline: true,
        }
    }
}

/// A note to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewNote {
    /// None puts the note in the default folder.
    pub folder_id: Option<FolderId>,
    pub content: Sealed,
    pub word_count: u32,
}

impl NewNote {
    pub fn new(content: Sealed, word_count: u32) -> Self {
        Self {
            folder_id: None,
            content,
            word_count,
        }
    }

    pub fn in_folder(mut self, folder_id: impl Into<FolderId>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }
}

enum Attempt<T> {
    Confirmed(T),
    Queue,
}

impl SyncEngine {
    // ========================================================================
    // Notes
    // ========================================================================

    pub async fn create_note(&self, new: NewNote) -> SyncResult<WriteOutcome<NoteRecord>> {
        let folder_id = match new.folder_id {
            Some(folder_id) => folder_id,
            None => self.require_default_folder().await?.id,
        };
        let draft = NoteDraft {
            id: NoteId::generate(),
            folder_id,
            content: new.content,
            word_count: new.word_count,
        };
        let mutation = Mutation::NoteCreate {
            note: draft.clone(),
        };

        match self.attempt(&mutation, self.inner.remote.create_note(&draft)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                debug!(note = %record.id, "note created");
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                let record = NoteRecord {
                    id: draft.id,
                    folder_id: draft.folder_id,
                    content: draft.content,
                    word_count: draft.word_count,
                    server_updated_at: None,
                    locally_edited_at: Some(now_millis()),
                    dirty: true,
                    deleted_at: None,
                };
                let mut batch = self.inner.mirror.batch();
                batch.put(&record)?;
                self.enqueue(batch, mutation, None).await?;
                Ok(WriteOutcome::queued(record))
            }
        }
    }

    pub async fn update_note(
        &self,
        id: &NoteId,
        patch: NotePatch,
    ) -> SyncResult<WriteOutcome<NoteRecord>> {
        let local = self.require_note(id).await?;
        if patch.is_empty() {
            return Ok(WriteOutcome::confirmed(local));
        }
        let mutation = Mutation::NoteUpdate {
            id: id.clone(),
            patch: patch.clone(),
        };

        match self.attempt(&mutation, self.inner.remote.update_note(id, &patch)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                // The base is what the server had before this edit.
                let base = local.server_updated_at;
                let mut record = local;
                patch.apply(&mut record);
                record.dirty = true;
                record.locally_edited_at = Some(now_millis());
                let mut batch = self.inner.mirror.batch();
                batch.put(&record)?;
                self.enqueue(batch, mutation, base).await?;
                Ok(WriteOutcome::queued(record))
            }
        }
    }

    /// Move a note to the trash.
    pub async fn delete_note(&self, id: &NoteId) -> SyncResult<WriteOutcome<NoteRecord>> {
        let local = self.require_note(id).await?;
        let mutation = Mutation::NoteSoftDelete { id: id.clone() };
        match self.attempt(&mutation, self.inner.remote.soft_delete_note(id)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                let mut record = local;
                record.deleted_at = Some(now_millis());
                self.queue_note(record, mutation).await
            }
        }
    }

    /// Bring a note back from the trash.
    pub async fn restore_note(&self, id: &NoteId) -> SyncResult<WriteOutcome<NoteRecord>> {
        let local = self.require_note(id).await?;
        let mutation = Mutation::NoteRestore { id: id.clone() };
        match self.attempt(&mutation, self.inner.remote.restore_note(id)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                let mut record = local;
                record.deleted_at = None;
                self.queue_note(record, mutation).await
            }
        }
    }

    async fn queue_note(
        &self,
        record: NoteRecord,
        mutation: Mutation,
    ) -> SyncResult<WriteOutcome<NoteRecord>> {
        let mut batch = self.inner.mirror.batch();
        batch.put(&record)?;
        self.enqueue(batch, mutation, None).await?;
        Ok(WriteOutcome::queued(record))
    }

    async fn require_note(&self, id: &NoteId) -> SyncResult<NoteRecord> {
        self.note(id)
            .await?
            .ok_or_else(|| SyncError::not_found("note", id.as_str()))
    }

    // ========================================================================
    // Folders
    // ========================================================================

    /// Create a folder. Offline, the folder gets a temporary id that is
    /// replaced by the server's id when the create is replayed.
    pub async fn create_folder(&self, draft: FolderDraft) -> SyncResult<WriteOutcome<FolderRecord>> {
        let temp_id = FolderId::temporary();
        let mutation = Mutation::FolderCreate {
            temp_id: temp_id.clone(),
            folder: draft.clone(),
        };

        match self.attempt(&mutation, self.inner.remote.create_folder(&draft)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                debug!(folder = %record.id, "folder created");
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                let record = FolderRecord {
                    id: temp_id,
                    parent_id: draft.parent_id,
                    name: draft.name,
                    is_default: false,
                    goal_word_count: draft.goal_word_count,
                    order: draft.order,
                    server_updated_at: None,
                };
                let mut batch = self.inner.mirror.batch();
                batch.put(&record)?;
                self.enqueue(batch, mutation, None).await?;
                Ok(WriteOutcome::queued(record))
            }
        }
    }

    pub async fn update_folder(
        &self,
        id: &FolderId,
        patch: FolderPatch,
    ) -> SyncResult<WriteOutcome<FolderRecord>> {
        let local = self.require_folder(id).await?;
        let mutation = Mutation::FolderUpdate {
            id: id.clone(),
            patch: patch.clone(),
        };
        match self.attempt(&mutation, self.inner.remote.update_folder(id, &patch)).await? {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                Ok(WriteOutcome::confirmed(record))
            }
            Attempt::Queue => {
                let base = local.server_updated_at;
                let mut record = local;
                patch.apply(&mut record);
                let mut batch = self.inner.mirror.batch();
                batch.put(&record)?;
                self.enqueue(batch, mutation, base).await?;
                Ok(WriteOutcome::queued(record))
            }
        }
    }

    /// Delete a non-default folder, moving its notes to the default folder.
    ///
    /// Returns how many notes were moved. The local cascade happens right
    /// away whether or not the server was reachable.
    pub async fn delete_folder(&self, id: &FolderId) -> SyncResult<WriteOutcome<usize>> {
        let local = self.require_folder(id).await?;
        if local.is_default {
            return Err(SyncError::DefaultFolder);
        }
        let default = self.require_default_folder().await?;
        let mutation = Mutation::FolderDelete { id: id.clone() };

        let attempt = match self.attempt(&mutation, self.inner.remote.delete_folder(id)).await {
            // Already gone on the server; just catch the mirror up.
            Err(SyncError::Remote(RemoteError::NotFound(_))) => Attempt::Confirmed(()),
            other => other?,
        };

        let mut batch = self.inner.mirror.batch();
        let moved = cascade_folder_delete(&self.inner.mirror, &mut batch, id, &default.id).await?;
        match attempt {
            Attempt::Confirmed(()) => {
                self.inner.mirror.commit(batch).await?;
                info!(folder = %id, moved, "folder deleted");
                Ok(WriteOutcome::confirmed(moved))
            }
            Attempt::Queue => {
                self.enqueue(batch, mutation, None).await?;
                Ok(WriteOutcome::queued(moved))
            }
        }
    }

    async fn require_folder(&self, id: &FolderId) -> SyncResult<FolderRecord> {
        self.inner
            .mirror
            .get(id.as_str())
            .await?
            .ok_or_else(|| SyncError::not_found("folder", id.as_str()))
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn update_settings(
        &self,
        blob: SettingsBlob,
    ) -> SyncResult<WriteOutcome<SettingsRecord>> {
        let mutation = Mutation::SettingsUpdate { blob: blob.clone() };
        let outcome = match self
            .attempt(&mutation, self.inner.remote.update_settings(&blob))
            .await?
        {
            Attempt::Confirmed(remote) => {
                let record = remote.into_record();
                self.inner.mirror.put(&record).await?;
                WriteOutcome::confirmed(record)
            }
            Attempt::Queue => {
                let record = SettingsRecord {
                    blob,
                    updated_at: now_millis(),
                };
                let mut batch = self.inner.mirror.batch();
                batch.put(&record)?;
                self.enqueue(batch, mutation, None).await?;
                WriteOutcome::queued(record)
            }
        };
        self.publish(SyncEvent::SettingsUpdated);
        Ok(outcome)
    }

    // ========================================================================
    // Shared
    // ========================================================================

    /// Try the direct remote call unless the mutation has to queue behind
    /// the outbox.
    async fn attempt<T, F>(&self, mutation: &Mutation, call: F) -> SyncResult<Attempt<T>>
    where
        F: Future<Output = RemoteResult<T>> + Send,
    {
        if let Some(reason) = self.must_queue(mutation).await? {
            debug!(kind = mutation.kind().as_str(), target = %mutation.target(), reason, "queueing behind outbox");
            return Ok(Attempt::Queue);
        }
        match call.await {
            Ok(value) => Ok(Attempt::Confirmed(value)),
            Err(err) if err.is_transient() => {
                info!(kind = mutation.kind().as_str(), error = %err, "remote unavailable, queueing");
                Ok(Attempt::Queue)
            }
            Err(err) => Err(SyncError::Remote(err)),
        }
    }

    /// A write goes straight to the queue when it references a folder the
    /// server has not seen yet, or when an earlier queued entry must reach the
    /// server first.
    async fn must_queue(&self, mutation: &Mutation) -> StoreResult<Option<&'static str>> {
        if !mutation.temporary_dependencies().is_empty() {
            return Ok(Some("references a temporary folder"));
        }
        for key in mutation.entities() {
            let queued = self.pending_for(&key).await?;
            if queued.iter().any(|entry| mutation.must_follow(&entry.mutation)) {
                return Ok(Some("ordered behind a queued entry"));
            }
        }
        Ok(None)
    }

    /// Add the outbox entry to `batch` and commit it.
    async fn enqueue(
        &self,
        mut batch: MirrorBatch,
        mutation: Mutation,
        base: Option<Timestamp>,
    ) -> SyncResult<OutboxEntry> {
        let entry = self.next_outbox_entry(mutation, base).await?;
        batch.put(&entry)?;
        self.inner.mirror.commit(batch).await?;
        info!(
            id = entry.id,
            kind = entry.mutation.kind().as_str(),
            target = %entry.mutation.target(),
            "write queued"
        );
        Ok(entry)
    }
}
