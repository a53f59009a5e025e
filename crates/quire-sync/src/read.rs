//! Cache-first reads.
//!
//! Every read answers from the mirror immediately and schedules a background
//! refresh from the remote. The refresh merges what it receives and fires a
//! `*.refreshed` event; if the remote is unreachable it simply ends.
//!
//! Merge rules:
//!
//! - A note that is dirty, or that has queued outbox entries, keeps its local
//!   fields; only `server_updated_at` moves to the remote value.
//! - A folder with queued outbox entries likewise keeps its local fields.
//! - Settings are left alone while a `settings.update` is queued.
//! - Everything else is replaced by the remote record.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quire_store::{FOLDER_INDEX, StoreResult};
use quire_types::{EntityKey, FolderId, FolderRecord, NoteId, NoteRecord, SETTINGS_KEY, SettingsRecord};

use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::events::SyncEvent;
use crate::remote::{NoteQuery, RemoteFolder, RemoteNote, RemoteSettings};

// ============================================================================
// Cached results
// ============================================================================

/// Handle to a background refresh.
///
/// Dropping it detaches the refresh; awaiting [`wait`](Self::wait) blocks
/// until the merge (and its event) is done.
#[derive(Debug)]
pub struct RefreshHandle {
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub(crate) fn spawned(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub(crate) fn skipped() -> Self {
        Self { task: None }
    }

    /// Whether a refresh was actually started.
    pub fn is_scheduled(&self) -> bool {
        self.task.is_some()
    }

    pub async fn wait(self) {
        if let Some(task) = self.task
            && let Err(err) = task.await
        {
            warn!(error = %err, "refresh task failed");
        }
    }
}

/// A value read from the mirror plus the refresh it scheduled.
#[derive(Debug)]
pub struct Cached<T> {
    pub value: T,
    pub refresh: RefreshHandle,
}

impl<T> Cached<T> {
    /// Take the cached value, detaching the refresh.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Wait for the refresh, then return the value that was cached before it.
    pub async fn settled(self) -> T {
        self.refresh.wait().await;
        self.value
    }
}

/// Which notes to list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NoteFilter {
    pub folder_id: Option<FolderId>,
    pub trashed: bool,
}

impl NoteFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_folder(folder_id: impl Into<FolderId>) -> Self {
        Self {
            folder_id: Some(folder_id.into()),
            trashed: false,
        }
    }

    pub fn trashed(mut self) -> Self {
        self.trashed = true;
        self
    }

    fn query(&self) -> NoteQuery {
        NoteQuery {
            folder_id: self.folder_id.clone(),
            trashed: self.trashed,
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

impl SyncEngine {
    /// Mirrored notes matching `filter`, then a background refresh.
    ///
    /// Notes in a folder that only exists locally (temporary id) are never
    /// asked for remotely.
    pub async fn notes(&self, filter: NoteFilter) -> SyncResult<Cached<Vec<NoteRecord>>> {
        let mirror = &self.inner.mirror;
        let mut notes: Vec<NoteRecord> = match &filter.folder_id {
            Some(folder_id) => mirror.by_index(FOLDER_INDEX, folder_id.as_str()).await?,
            None => mirror.all().await?,
        };
        notes.retain(|n| n.is_trashed() == filter.trashed);
        debug!(count = notes.len(), folder = ?filter.folder_id, trashed = filter.trashed, "notes from mirror");

        let refresh = if filter.folder_id.as_ref().is_some_and(FolderId::is_temporary) {
            RefreshHandle::skipped()
        } else {
            let engine = self.clone();
            let query = filter.query();
            self.spawn_refresh("notes", async move { engine.refresh_notes(query).await })
        };
        Ok(Cached {
            value: notes,
            refresh,
        })
    }

    /// One mirrored note. No refresh is scheduled.
    pub async fn note(&self, id: &NoteId) -> SyncResult<Option<NoteRecord>> {
        Ok(self.inner.mirror.get(id.as_str()).await?)
    }

    /// Mirrored folders ordered by `order`, then a background refresh.
    pub async fn folders(&self) -> SyncResult<Cached<Vec<FolderRecord>>> {
        let mut folders: Vec<FolderRecord> = self.inner.mirror.all().await?;
        folders.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        let engine = self.clone();
        let refresh = self.spawn_refresh("folders", async move { engine.refresh_folders().await });
        Ok(Cached {
            value: folders,
            refresh,
        })
    }

    /// The mirrored settings singleton, then a background refresh.
    pub async fn settings(&self) -> SyncResult<Cached<Option<SettingsRecord>>> {
        let settings = self.inner.mirror.get(SETTINGS_KEY).await?;
        let engine = self.clone();
        let refresh =
            self.spawn_refresh("settings", async move { engine.refresh_settings().await });
        Ok(Cached {
            value: settings,
            refresh,
        })
    }

    // ── Refresh tasks ───────────────────────────────────────────────────────

    async fn refresh_notes(&self, query: NoteQuery) {
        let remote = match self.inner.remote.list_notes(&query).await {
            Ok(notes) => notes,
            Err(err) => {
                debug!(error = %err, "note refresh skipped");
                return;
            }
        };
        match self.merge_notes(remote).await {
            Ok(merged) => {
                debug!(merged, "notes refreshed");
                self.publish(SyncEvent::NotesRefreshed);
            }
            Err(err) => warn!(error = %err, "note refresh merge failed"),
        }
    }

    async fn refresh_folders(&self) {
        let remote = match self.inner.remote.list_folders().await {
            Ok(folders) => folders,
            Err(err) => {
                debug!(error = %err, "folder refresh skipped");
                return;
            }
        };
        match self.merge_folders(remote).await {
            Ok(merged) => {
                debug!(merged, "folders refreshed");
                self.publish(SyncEvent::FoldersRefreshed);
            }
            Err(err) => warn!(error = %err, "folder refresh merge failed"),
        }
    }

    async fn refresh_settings(&self) {
        let remote = match self.inner.remote.get_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                debug!(error = %err, "settings refresh skipped");
                return;
            }
        };
        match self.merge_settings(remote).await {
            Ok(true) => self.publish(SyncEvent::SettingsRefreshed),
            Ok(false) => debug!("settings refresh deferred to queued update"),
            Err(err) => warn!(error = %err, "settings refresh merge failed"),
        }
    }

    // ── Merges ──────────────────────────────────────────────────────────────

    /// Merge remote notes into the mirror. Returns how many were written.
    ///
    /// Notes the server still files under a folder whose delete is queued
    /// land in the default folder, as the local cascade already did.
    pub(crate) async fn merge_notes(&self, remote: Vec<RemoteNote>) -> StoreResult<usize> {
        let mirror = &self.inner.mirror;
        let outbox = self.outbox_view().await?;
        let default = self.mirrored_default_folder().await?.map(|f| f.id);
        let mut merged = 0;
        for mut incoming in remote {
            if outbox.deletes(&incoming.folder_id)
                && let Some(default) = &default
            {
                incoming.folder_id = default.clone();
            }
            let queued = outbox.holds(&EntityKey::Note(incoming.id.clone()));
            // Re-read right before the write so a concurrent local edit is seen.
            let local: Option<NoteRecord> = mirror.get(incoming.id.as_str()).await?;
            let record = merge_note(local, incoming, queued);
            mirror.put(&record).await?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Merge remote folders. Folders with a queued delete stay gone.
    pub(crate) async fn merge_folders(&self, remote: Vec<RemoteFolder>) -> StoreResult<usize> {
        let mirror = &self.inner.mirror;
        let outbox = self.outbox_view().await?;
        let mut merged = 0;
        for incoming in remote {
            if outbox.deletes(&incoming.id) {
                debug!(folder = %incoming.id, "skipping folder with queued delete");
                continue;
            }
            let local: Option<FolderRecord> = mirror.get(incoming.id.as_str()).await?;
            let record = match local {
                Some(mut local) if outbox.holds(&EntityKey::Folder(local.id.clone())) => {
                    local.server_updated_at = Some(incoming.updated_at);
                    local
                }
                _ => incoming.into_record(),
            };
            mirror.put(&record).await?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Returns false when a queued settings update kept the merge out.
    pub(crate) async fn merge_settings(&self, remote: RemoteSettings) -> StoreResult<bool> {
        if !self.pending_for(&EntityKey::Settings).await?.is_empty() {
            return Ok(false);
        }
        self.inner.mirror.put(&remote.into_record()).await?;
        Ok(true)
    }
}

/// The dirty-preserving merge for a single note.
pub(crate) fn merge_note(local: Option<NoteRecord>, incoming: RemoteNote, queued: bool) -> NoteRecord {
    match local {
        Some(mut local) if local.dirty || queued => {
            local.server_updated_at = Some(incoming.updated_at);
            local
        }
        _ => incoming.into_record(),
    }
}
