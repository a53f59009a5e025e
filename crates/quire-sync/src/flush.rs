//! Outbox replay.
//!
//! # Run
//!
//! ```text
//! snapshot queued ids in (created_at, id) order
//!   for each id:
//!     re-read entry ──── gone ─────────────────────► skip
//!     must follow a held entry ────────────────────► defer, hold it
//!     references a temporary folder ───────────────► defer, hold it
//!     replay ──┬─ ok ──────────────────────────────► write through, retire entry
//!              ├─ local entity gone ───────────────► retire entry
//!              ├─ transient / store failure ───────► keep entry, hold it
//!              └─ permanent refusal ───────────────► retire entry, report it
//! publish refreshed events, then outbox.flushed
//! ```
//!
//! Each replay is its own unit: the write-through and the retirement of the
//! entry commit in one store batch, so a crash mid-run leaves a consistent
//! mirror and a correctly truncated outbox.
//!
//! Runs on one engine are serialized. An entry that stays queued is held for
//! the rest of the run, and anything that [`Mutation::must_follow`] it is
//! deferred too, so per-entity order survives across runs. Unrelated entries,
//! including other notes in the same folder, keep replaying.
//!
//! A refused `folder.create` takes its temporary folder with it: notes and
//! queued payloads that referenced it fall back to the default folder.
//!
//! # Conflicts
//!
//! A `note.update` whose base differs from the server's current `updated_at`
//! raced a change made elsewhere. The local record is snapshotted into history
//! (reason `conflict`) and the update is sent anyway.

use thiserror::Error;
use tracing::{debug, info, warn};

use quire_store::{StoreError, sequence_key};
use quire_types::{
    EntityKey, EntityKind, FolderId, FolderRecord, Mutation, NoteId, NoteRecord, OutboxEntry,
    SnapshotReason, Timestamp, now_millis,
};

use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::events::SyncEvent;
use crate::reconcile::{abandon_temporary_folder, cascade_folder_delete, reconcile_folder_id};
use crate::remote::RemoteError;

/// What one flush run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries confirmed by the server and retired.
    pub replayed: usize,
    /// Entries left for a later run behind a failure or a temporary id.
    pub deferred: usize,
    /// Entries that failed transiently and stay queued.
    pub failed: usize,
    /// Entries retired without effect: refused by the server, or their local
    /// entity no longer exists.
    pub dropped: usize,
    /// Updates that overwrote a concurrent remote change.
    pub conflicts: usize,
    /// `(temporary, server)` folder ids reconciled during the run.
    pub reconciled: Vec<(FolderId, FolderId)>,
}

impl FlushReport {
    /// Entries looked at in this run.
    pub fn attempted(&self) -> usize {
        self.replayed + self.deferred + self.failed + self.dropped
    }
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no default folder in the mirror")]
    NoDefaultFolder,
}

impl ReplayError {
    fn is_retryable(&self) -> bool {
        match self {
            ReplayError::Remote(err) => err.is_transient(),
            ReplayError::Store(_) | ReplayError::NoDefaultFolder => true,
        }
    }
}

enum Replayed {
    Confirmed { conflict: bool },
    /// The local entity vanished between enqueue and flush.
    Vanished,
}

/// Which entity classes a run changed.
#[derive(Debug, Default)]
struct Touched {
    notes: bool,
    folders: bool,
    settings: bool,
}

impl Touched {
    fn mark(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::NoteCreate { .. }
            | Mutation::NoteUpdate { .. }
            | Mutation::NoteSoftDelete { .. }
            | Mutation::NoteRestore { .. } => self.notes = true,
            // folder replays can rewrite or move notes too
            Mutation::FolderCreate { .. } | Mutation::FolderDelete { .. } => {
                self.folders = true;
                self.notes = true;
            }
            Mutation::FolderUpdate { .. } => self.folders = true,
            Mutation::SettingsUpdate { .. } => self.settings = true,
        }
    }
}

impl SyncEngine {
    /// Replay queued outbox entries against the remote.
    ///
    /// Only a failure to read the outbox itself is an error; per-entry
    /// failures are counted in the report and retried on a later run.
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        let _gate = self.inner.flush_gate.lock().await;
        let mut report = FlushReport::default();

        let queued = self.pending().await?;
        if queued.is_empty() {
            debug!("outbox empty");
            return Ok(report);
        }
        info!(queued = queued.len(), "flushing outbox");

        let mut held: Vec<Mutation> = Vec::new();
        let mut touched = Touched::default();

        for id in queued.iter().map(|e| e.id) {
            // Re-read: an earlier reconciliation in this run may have rewritten it.
            let entry = match self.inner.mirror.get::<OutboxEntry>(&sequence_key(id)).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    warn!(id, error = %err, "unreadable outbox entry left in place");
                    report.failed += 1;
                    continue;
                }
            };
            let kind = entry.mutation.kind().as_str();

            if held.iter().any(|earlier| entry.mutation.must_follow(earlier)) {
                debug!(id, kind, "deferred behind an earlier entry");
                report.deferred += 1;
                held.push(entry.mutation);
                continue;
            }
            let dependencies = entry.mutation.temporary_dependencies();
            if !dependencies.is_empty() {
                debug!(id, kind, ?dependencies, "deferred until folder is created");
                report.deferred += 1;
                held.push(entry.mutation);
                continue;
            }

            match self.replay(&entry, &mut report).await {
                Ok(Replayed::Confirmed { conflict }) => {
                    info!(id, kind, target = %entry.mutation.target(), conflict, "replayed");
                    report.replayed += 1;
                    report.conflicts += usize::from(conflict);
                    touched.mark(&entry.mutation);
                }
                Ok(Replayed::Vanished) => {
                    info!(id, kind, target = %entry.mutation.target(), "local entity gone, entry dropped");
                    report.dropped += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!(id, kind, error = %err, "replay failed, will retry");
                    report.failed += 1;
                    held.push(entry.mutation);
                }
                Err(err) => match self.drop_refused(&entry).await {
                    Ok(()) => {
                        warn!(id, kind, target = %entry.mutation.target(), error = %err, "remote refused entry, dropped");
                        report.dropped += 1;
                        if matches!(entry.mutation, Mutation::FolderCreate { .. }) {
                            touched.mark(&entry.mutation);
                        }
                    }
                    Err(drop_err) => {
                        warn!(id, kind, error = %drop_err, "could not drop refused entry");
                        report.failed += 1;
                        held.push(entry.mutation);
                    }
                },
            }
        }

        let remaining = self.pending().await?.len();
        if touched.notes {
            self.publish(SyncEvent::NotesRefreshed);
        }
        if touched.folders {
            self.publish(SyncEvent::FoldersRefreshed);
        }
        if touched.settings {
            self.publish(SyncEvent::SettingsUpdated);
        }
        self.publish(SyncEvent::OutboxFlushed {
            replayed: report.replayed,
            remaining,
        });
        info!(
            replayed = report.replayed,
            deferred = report.deferred,
            failed = report.failed,
            dropped = report.dropped,
            conflicts = report.conflicts,
            remaining,
            "flush finished"
        );
        Ok(report)
    }

    async fn replay(
        &self,
        entry: &OutboxEntry,
        report: &mut FlushReport,
    ) -> Result<Replayed, ReplayError> {
        let mirror = &self.inner.mirror;
        let remote = &self.inner.remote;

        match &entry.mutation {
            Mutation::NoteCreate { note } => {
                if !self.note_exists(&note.id).await? {
                    return self.vanished(entry).await;
                }
                let created = remote.create_note(note).await?;
                self.confirm_note(entry, &note.id, created.updated_at, None, &[])
                    .await?;
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::NoteUpdate { id, patch } => {
                let Some(local) = mirror.get::<NoteRecord>(id.as_str()).await? else {
                    return self.vanished(entry).await;
                };
                let current = remote.get_note(id).await?;
                let conflict = entry.base_server_updated_at != Some(current.updated_at);
                if conflict {
                    warn!(
                        note = %id,
                        base = ?entry.base_server_updated_at,
                        remote = current.updated_at,
                        "concurrent remote change, local update wins"
                    );
                    let mut batch = mirror.batch();
                    let snapshot = self
                        .new_snapshot(EntityKind::Note, id.as_str(), local.content, SnapshotReason::Conflict)
                        .await?;
                    batch.put(&snapshot)?;
                    if self.inner.config.snapshot_remote_on_conflict {
                        let overwritten = self
                            .new_snapshot(EntityKind::Note, id.as_str(), current.content, SnapshotReason::Conflict)
                            .await?;
                        batch.put(&overwritten)?;
                    }
                    mirror.commit(batch).await?;
                }
                let updated = remote.update_note(id, patch).await?;
                self.confirm_note(entry, id, updated.updated_at, None, &[Some(current.updated_at)])
                    .await?;
                Ok(Replayed::Confirmed { conflict })
            }

            Mutation::NoteSoftDelete { id } => {
                if !self.note_exists(id).await? {
                    return self.vanished(entry).await;
                }
                let trashed = remote.soft_delete_note(id).await?;
                let deleted_at = trashed.deleted_at.unwrap_or_else(now_millis);
                self.confirm_note(entry, id, trashed.updated_at, Some(Some(deleted_at)), &[])
                    .await?;
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::NoteRestore { id } => {
                if !self.note_exists(id).await? {
                    return self.vanished(entry).await;
                }
                let restored = remote.restore_note(id).await?;
                self.confirm_note(entry, id, restored.updated_at, Some(None), &[])
                    .await?;
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::FolderCreate { temp_id, folder } => {
                let created = remote.create_folder(folder).await?;
                let mut batch = mirror.batch();
                batch.delete::<OutboxEntry>(sequence_key(entry.id));
                if &created.id != temp_id {
                    let summary =
                        reconcile_folder_id(mirror, &mut batch, temp_id, &created, entry.id).await?;
                    mirror.commit(batch).await?;
                    info!(
                        temp = %temp_id,
                        server = %created.id,
                        notes = summary.notes,
                        child_folders = summary.child_folders,
                        entries = summary.entries,
                        "folder id reconciled"
                    );
                    report.reconciled.push((temp_id.clone(), created.id));
                } else {
                    if mirror.get::<FolderRecord>(temp_id.as_str()).await?.is_some() {
                        batch.put(&created.into_record())?;
                    }
                    mirror.commit(batch).await?;
                }
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::FolderUpdate { id, patch } => {
                let Some(mut local) = mirror.get::<FolderRecord>(id.as_str()).await? else {
                    return self.vanished(entry).await;
                };
                let updated = remote.update_folder(id, patch).await?;
                let queued_after = self.others_pending(entry, &EntityKey::Folder(id.clone())).await?;
                let mut batch = mirror.batch();
                batch.delete::<OutboxEntry>(sequence_key(entry.id));
                if queued_after.is_empty() {
                    batch.put(&updated.into_record())?;
                } else {
                    local.server_updated_at = Some(updated.updated_at);
                    batch.put(&local)?;
                }
                mirror.commit(batch).await?;
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::FolderDelete { id } => {
                let default = self
                    .mirrored_default_folder()
                    .await?
                    .ok_or(ReplayError::NoDefaultFolder)?;
                match remote.delete_folder(id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                let mut batch = mirror.batch();
                batch.delete::<OutboxEntry>(sequence_key(entry.id));
                let moved = cascade_folder_delete(mirror, &mut batch, id, &default.id).await?;
                mirror.commit(batch).await?;
                debug!(folder = %id, moved, "folder delete mirrored");
                Ok(Replayed::Confirmed { conflict: false })
            }

            Mutation::SettingsUpdate { blob } => {
                let confirmed = remote.update_settings(blob).await?;
                let queued_after = self.others_pending(entry, &EntityKey::Settings).await?;
                let mut batch = mirror.batch();
                batch.delete::<OutboxEntry>(sequence_key(entry.id));
                // A newer queued blob stays local until it replays itself.
                if queued_after.is_empty() {
                    batch.put(&confirmed.into_record())?;
                }
                mirror.commit(batch).await?;
                Ok(Replayed::Confirmed { conflict: false })
            }
        }
    }

    /// Write a confirmed note mutation through and retire its entry.
    ///
    /// Queued updates for the note whose base is now superseded by this
    /// confirmation are rebased onto the new server timestamp, so the
    /// engine's own writes never look like concurrent changes. `dirty` clears
    /// only once nothing else for the note is queued.
    async fn confirm_note(
        &self,
        entry: &OutboxEntry,
        id: &NoteId,
        updated_at: Timestamp,
        deleted_at: Option<Option<Timestamp>>,
        superseded: &[Option<Timestamp>],
    ) -> Result<(), ReplayError> {
        let mirror = &self.inner.mirror;
        let mut batch = mirror.batch();
        batch.delete::<OutboxEntry>(sequence_key(entry.id));

        if let Some(mut local) = mirror.get::<NoteRecord>(id.as_str()).await? {
            let previous = local.server_updated_at;
            let queued_after = self.others_pending(entry, &EntityKey::Note(id.clone())).await?;
            for mut later in queued_after.iter().cloned() {
                let base = later.base_server_updated_at;
                let stale = base == previous
                    || base == entry.base_server_updated_at
                    || superseded.contains(&base);
                if matches!(later.mutation, Mutation::NoteUpdate { .. }) && stale {
                    later.base_server_updated_at = Some(updated_at);
                    batch.put(&later)?;
                }
            }

            if let Some(deleted_at) = deleted_at {
                local.deleted_at = deleted_at;
            }
            if queued_after.is_empty() {
                local.confirm(updated_at);
            } else {
                local.server_updated_at = Some(updated_at);
            }
            batch.put(&local)?;
        }

        mirror.commit(batch).await?;
        Ok(())
    }

    /// Queued entries addressed to `key`, other than `entry`.
    async fn others_pending(
        &self,
        entry: &OutboxEntry,
        key: &EntityKey,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut others = self.pending_for(key).await?;
        others.retain(|e| e.id != entry.id && e.mutation.target() == *key);
        Ok(others)
    }

    async fn note_exists(&self, id: &NoteId) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .mirror
            .get::<NoteRecord>(id.as_str())
            .await?
            .is_some())
    }

    /// Retire an entry the server refused for good.
    ///
    /// A refused `folder.create` also removes its temporary folder, so
    /// nothing stays parked behind an id that will never resolve.
    async fn drop_refused(&self, entry: &OutboxEntry) -> Result<(), ReplayError> {
        let Mutation::FolderCreate { temp_id, .. } = &entry.mutation else {
            self.retire(entry).await?;
            return Ok(());
        };
        let mirror = &self.inner.mirror;
        let default = self
            .mirrored_default_folder()
            .await?
            .ok_or(ReplayError::NoDefaultFolder)?;
        let mut batch = mirror.batch();
        batch.delete::<OutboxEntry>(sequence_key(entry.id));
        let summary =
            abandon_temporary_folder(mirror, &mut batch, temp_id, &default.id, entry.id).await?;
        mirror.commit(batch).await?;
        info!(
            temp = %temp_id,
            fallback = %default.id,
            notes = summary.notes,
            child_folders = summary.child_folders,
            entries = summary.entries,
            discarded = summary.discarded,
            "temporary folder abandoned"
        );
        Ok(())
    }

    async fn vanished(&self, entry: &OutboxEntry) -> Result<Replayed, ReplayError> {
        self.retire(entry).await?;
        Ok(Replayed::Vanished)
    }

    async fn retire(&self, entry: &OutboxEntry) -> Result<(), StoreError> {
        self.inner
            .mirror
            .delete::<OutboxEntry>(&sequence_key(entry.id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{MemoryRemote, RemoteCall};
    use crate::write::NewNote;
    use quire_store::Mirror;
    use quire_types::{NotePatch, Sealed};

    async fn setup() -> (SyncEngine, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(Mirror::in_memory(), remote.clone(), SyncConfig::default());
        engine.folders().await.unwrap().settled().await;
        (engine, remote)
    }

    fn sealed(text: &str) -> Sealed {
        Sealed::new(text.as_bytes().to_vec(), b"nonce".to_vec())
    }

    #[tokio::test]
    async fn transient_failure_defers_the_rest_of_that_note() {
        let (engine, remote) = setup().await;
        remote.set_online(false);
        let a = engine.create_note(NewNote::new(sealed("a"), 1)).await.unwrap().value;
        engine
            .update_note(&a.id, NotePatch::content(sealed("a2"), 1))
            .await
            .unwrap();
        let b = engine.create_note(NewNote::new(sealed("b"), 1)).await.unwrap().value;

        remote.set_online(true);
        remote.fail_next(RemoteError::Timeout);
        let report = engine.flush().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.replayed, 1);
        assert!(remote.note(&b.id).is_some());
        assert!(remote.note(&a.id).is_none());

        let pending = engine.pending().await.unwrap();
        assert_eq!(pending.len(), 2);

        let report = engine.flush().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.conflicts, 0);
        assert_eq!(remote.note(&a.id).unwrap().content, sealed("a2"));
        let local = engine.note(&a.id).await.unwrap().unwrap();
        assert!(!local.dirty);
    }

    #[tokio::test]
    async fn failure_does_not_hold_back_other_notes_in_the_folder() {
        let (engine, remote) = setup().await;
        remote.set_online(false);
        let notes = [
            engine.create_note(NewNote::new(sealed("a"), 1)).await.unwrap().value,
            engine.create_note(NewNote::new(sealed("b"), 1)).await.unwrap().value,
            engine.create_note(NewNote::new(sealed("c"), 1)).await.unwrap().value,
        ];
        remote.set_online(true);
        remote.fail_next(RemoteError::Timeout);

        let report = engine.flush().await.unwrap();
        assert_eq!((report.failed, report.deferred, report.replayed), (1, 0, 2));
        assert!(remote.note(&notes[0].id).is_none());
        assert!(remote.note(&notes[1].id).is_some());
        assert!(remote.note(&notes[2].id).is_some());
    }

    #[tokio::test]
    async fn refused_entry_is_dropped_not_retried() {
        let (engine, remote) = setup().await;
        remote.set_online(false);
        engine.create_note(NewNote::new(sealed("x"), 1)).await.unwrap();
        remote.set_online(true);
        remote.fail_next(RemoteError::rejected(413, "too large"));

        let report = engine.flush().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(engine.pending().await.unwrap().is_empty());

        remote.clear_calls();
        let again = engine.flush().await.unwrap();
        assert_eq!(again, FlushReport::default());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn update_for_vanished_note_is_dropped() {
        let (engine, remote) = setup().await;
        let note = engine.create_note(NewNote::new(sealed("x"), 1)).await.unwrap().value;
        remote.set_online(false);
        engine
            .update_note(&note.id, NotePatch::content(sealed("y"), 1))
            .await
            .unwrap();
        engine.mirror().delete::<NoteRecord>(note.id.as_str()).await.unwrap();

        remote.set_online(true);
        remote.clear_calls();
        let report = engine.flush().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(remote.writes().is_empty());
    }

    #[tokio::test]
    async fn own_queued_updates_are_not_conflicts() {
        let (engine, remote) = setup().await;
        let note = engine.create_note(NewNote::new(sealed("v0"), 1)).await.unwrap().value;
        remote.set_online(false);
        for text in ["v1", "v2", "v3"] {
            engine
                .update_note(&note.id, NotePatch::content(sealed(text), 1))
                .await
                .unwrap();
        }
        remote.set_online(true);
        let report = engine.flush().await.unwrap();
        assert_eq!(report.replayed, 3);
        assert_eq!(report.conflicts, 0);
        assert!(engine.history(EntityKind::Note, note.id.as_str()).await.unwrap().is_empty());
        assert_eq!(remote.note(&note.id).unwrap().content, sealed("v3"));
    }

    #[tokio::test]
    async fn remote_snapshot_on_conflict_is_opt_in() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(
            Mirror::in_memory(),
            remote.clone(),
            SyncConfig::default().with_snapshot_remote_on_conflict(true),
        );
        engine.folders().await.unwrap().settled().await;
        let note = engine.create_note(NewNote::new(sealed("v0"), 1)).await.unwrap().value;
        remote.set_online(false);
        engine
            .update_note(&note.id, NotePatch::content(sealed("mine"), 1))
            .await
            .unwrap();
        remote.edit_elsewhere(&note.id, sealed("theirs")).unwrap();
        remote.set_online(true);

        let report = engine.flush().await.unwrap();
        assert_eq!(report.conflicts, 1);
        let history = engine.history(EntityKind::Note, note.id.as_str()).await.unwrap();
        let contents: Vec<_> = history.iter().map(|h| h.snapshot.clone()).collect();
        assert_eq!(contents, vec![sealed("mine"), sealed("theirs")]);
    }

    #[tokio::test]
    async fn flush_publishes_events() {
        let (engine, remote) = setup().await;
        remote.set_online(false);
        engine.create_note(NewNote::new(sealed("x"), 1)).await.unwrap();
        remote.set_online(true);

        let mut sub = engine.subscribe(">");
        engine.flush().await.unwrap();
        let events = sub.drain();
        assert!(events.contains(&SyncEvent::NotesRefreshed));
        assert_eq!(
            events.last(),
            Some(&SyncEvent::OutboxFlushed {
                replayed: 1,
                remaining: 0
            })
        );
        assert!(remote.calls().contains(&RemoteCall::CreateNote(
            engine.notes(Default::default()).await.unwrap().value[0].id.clone()
        )));
    }
}
