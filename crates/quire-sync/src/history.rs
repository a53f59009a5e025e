//! Append-only content history.
//!
//! Snapshots are written on flush conflicts and on explicit request. The
//! engine never rewrites or removes one.

use tracing::debug;

use quire_store::{ENTITY_INDEX, StoreResult};
use quire_types::{
    EntityKind, FolderId, FolderRecord, HistorySnapshot, NoteId, NoteRecord, Sealed,
    SnapshotReason, now_millis,
};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};

impl SyncEngine {
    /// Record the note's current sealed content.
    pub async fn snapshot_note(
        &self,
        id: &NoteId,
        reason: SnapshotReason,
    ) -> SyncResult<HistorySnapshot> {
        let note: NoteRecord = self
            .inner
            .mirror
            .get(id.as_str())
            .await?
            .ok_or_else(|| SyncError::not_found("note", id.as_str()))?;
        self.store_snapshot(EntityKind::Note, id.as_str(), note.content, reason)
            .await
    }

    /// Record the folder's current sealed name.
    pub async fn snapshot_folder(
        &self,
        id: &FolderId,
        reason: SnapshotReason,
    ) -> SyncResult<HistorySnapshot> {
        let folder: FolderRecord = self
            .inner
            .mirror
            .get(id.as_str())
            .await?
            .ok_or_else(|| SyncError::not_found("folder", id.as_str()))?;
        self.store_snapshot(EntityKind::Folder, id.as_str(), folder.name, reason)
            .await
    }

    /// Snapshots for one entity, oldest first.
    pub async fn history(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> SyncResult<Vec<HistorySnapshot>> {
        let index = format!("{kind}:{entity_id}");
        let mut snapshots: Vec<HistorySnapshot> =
            self.inner.mirror.by_index(ENTITY_INDEX, &index).await?;
        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    async fn store_snapshot(
        &self,
        kind: EntityKind,
        entity_id: &str,
        content: Sealed,
        reason: SnapshotReason,
    ) -> SyncResult<HistorySnapshot> {
        let snapshot = self.new_snapshot(kind, entity_id, content, reason).await?;
        self.inner.mirror.put(&snapshot).await?;
        debug!(id = snapshot.id, entity = %snapshot.entity_index(), %reason, "snapshot stored");
        Ok(snapshot)
    }

    /// Build (but do not store) the next snapshot.
    pub(crate) async fn new_snapshot(
        &self,
        kind: EntityKind,
        entity_id: &str,
        content: Sealed,
        reason: SnapshotReason,
    ) -> StoreResult<HistorySnapshot> {
        let id = self.inner.mirror.next_id::<HistorySnapshot>().await?;
        Ok(HistorySnapshot {
            id,
            entity_kind: kind,
            entity_id: entity_id.to_string(),
            snapshot: content,
            created_at: now_millis(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::MemoryRemote;
    use crate::write::NewNote;
    use quire_store::Mirror;

    #[tokio::test]
    async fn manual_snapshots_accumulate_in_order() {
        let engine = SyncEngine::new(
            Mirror::in_memory(),
            Arc::new(MemoryRemote::new()),
            SyncConfig::default(),
        );
        engine.folders().await.unwrap().settled().await;
        let note = engine
            .create_note(NewNote::new(Sealed::new(b"one".to_vec(), b"n".to_vec()), 1))
            .await
            .unwrap()
            .value;

        engine.snapshot_note(&note.id, SnapshotReason::Manual).await.unwrap();
        engine.snapshot_note(&note.id, SnapshotReason::Autosave).await.unwrap();

        let history = engine.history(EntityKind::Note, note.id.as_str()).await.unwrap();
        let reasons: Vec<_> = history.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SnapshotReason::Manual, SnapshotReason::Autosave]);
        assert!(history.iter().all(|s| s.snapshot.ciphertext == b"one"));

        let inbox = FolderId::new("inbox");
        let folder = engine.snapshot_folder(&inbox, SnapshotReason::Manual).await.unwrap();
        assert_eq!(folder.entity_kind, EntityKind::Folder);
        assert_eq!(engine.history(EntityKind::Folder, "inbox").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_of_missing_entity_is_not_found() {
        let engine = SyncEngine::new(
            Mirror::in_memory(),
            Arc::new(MemoryRemote::new()),
            SyncConfig::default(),
        );
        let err = engine
            .snapshot_note(&NoteId::new("ghost"), SnapshotReason::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { kind: "note", .. }));
    }
}
