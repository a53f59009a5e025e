//! The engine handle and the state every path shares.
//!
//! The read path lives in `read.rs`, the write path in `write.rs`, outbox
//! replay in `flush.rs`. Each adds an `impl SyncEngine` block on top of the
//! plumbing defined here.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use quire_store::{DEFAULT_INDEX, ENTITY_INDEX, Mirror, StoreResult};
use quire_types::{EntityKey, FolderId, FolderRecord, Mutation, OutboxEntry, Timestamp, now_millis};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, Subscription, SyncEvent};
use crate::read::RefreshHandle;
use crate::remote::RemoteService;

/// Offline-first sync engine.
///
/// Cheap to clone; clones share one mirror, one remote, one event bus and one
/// set of background tasks. Engines hold no global state, so several can run
/// side by side against different mirrors.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) mirror: Mirror,
    pub(crate) remote: Arc<dyn RemoteService>,
    pub(crate) events: EventBus,
    pub(crate) config: SyncConfig,
    tasks: TaskTracker,
    cancel: CancellationToken,
    /// Held for the duration of a flush run.
    pub(crate) flush_gate: AsyncMutex<()>,
    last_enqueued_at: AtomicU64,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("mirror", &self.inner.mirror)
            .field("background_tasks", &self.inner.tasks.len())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(mirror: Mirror, remote: Arc<dyn RemoteService>, config: SyncConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                mirror,
                remote,
                events,
                config,
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                flush_gate: AsyncMutex::new(()),
                last_enqueued_at: AtomicU64::new(0),
            }),
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.inner.mirror
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.inner.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Shorthand for `events().subscribe(pattern)`.
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        self.inner.events.subscribe(pattern)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Cancel outstanding background refreshes and wait for them to exit.
    ///
    /// Reads keep working afterwards but no longer schedule refreshes.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        debug!("sync engine shut down");
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        self.inner.events.publish(event);
    }

    /// Run `task` in the background unless the engine is shutting down.
    pub(crate) fn spawn_refresh<F>(&self, name: &'static str, task: F) -> RefreshHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.cancel.is_cancelled() {
            return RefreshHandle::skipped();
        }
        let cancel = self.inner.cancel.clone();
        let handle = self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!(task = name, "refresh cancelled"),
                _ = task => {}
            }
        });
        RefreshHandle::spawned(handle)
    }

    // ========================================================================
    // Outbox
    // ========================================================================

    /// Queued entries in flush order.
    pub async fn pending(&self) -> SyncResult<Vec<OutboxEntry>> {
        let mut entries: Vec<OutboxEntry> = self.inner.mirror.all().await?;
        entries.sort_by_key(OutboxEntry::order_key);
        Ok(entries)
    }

    /// Queued entries touching `key`, in flush order.
    pub(crate) async fn pending_for(&self, key: &EntityKey) -> StoreResult<Vec<OutboxEntry>> {
        let mut entries: Vec<OutboxEntry> = self
            .inner
            .mirror
            .by_index(ENTITY_INDEX, &key.index_value())
            .await?;
        entries.sort_by_key(OutboxEntry::order_key);
        Ok(entries)
    }

    /// What the outbox holds back from a refresh merge.
    pub(crate) async fn outbox_view(&self) -> StoreResult<OutboxView> {
        let entries: Vec<OutboxEntry> = self.inner.mirror.all().await?;
        let mut view = OutboxView::default();
        for entry in &entries {
            view.targets.insert(entry.mutation.target());
            if let Mutation::FolderDelete { id } = &entry.mutation {
                view.deleted_folders.insert(id.clone());
            }
        }
        Ok(view)
    }

    /// Build (but do not store) the next outbox entry.
    ///
    /// `created_at` never goes backwards within one engine, even if the wall
    /// clock does.
    pub(crate) async fn next_outbox_entry(
        &self,
        mutation: Mutation,
        base_server_updated_at: Option<Timestamp>,
    ) -> StoreResult<OutboxEntry> {
        let id = self.inner.mirror.next_id::<OutboxEntry>().await?;
        let now = now_millis();
        let previous = self.inner.last_enqueued_at.fetch_max(now, Ordering::SeqCst);
        Ok(OutboxEntry {
            id,
            mutation,
            base_server_updated_at,
            created_at: now.max(previous),
        })
    }

    // ========================================================================
    // Folders
    // ========================================================================

    /// The mirrored default ("inbox") folder.
    pub async fn default_folder(&self) -> SyncResult<Option<FolderRecord>> {
        Ok(self.mirrored_default_folder().await?)
    }

    pub(crate) async fn mirrored_default_folder(&self) -> StoreResult<Option<FolderRecord>> {
        let folders: Vec<FolderRecord> = self.inner.mirror.by_index(DEFAULT_INDEX, "true").await?;
        Ok(folders.into_iter().next())
    }

    pub(crate) async fn require_default_folder(&self) -> SyncResult<FolderRecord> {
        self.default_folder().await?.ok_or(SyncError::NoDefaultFolder)
    }
}

/// Entities with queued entries addressed to them.
///
/// Only targets count: a note queued into `inbox` does not make `inbox`
/// itself pending.
#[derive(Debug, Default)]
pub(crate) struct OutboxView {
    targets: HashSet<EntityKey>,
    deleted_folders: HashSet<FolderId>,
}

impl OutboxView {
    pub(crate) fn holds(&self, key: &EntityKey) -> bool {
        self.targets.contains(key)
    }

    /// A `folder.delete` for `id` is still queued.
    pub(crate) fn deletes(&self, id: &FolderId) -> bool {
        self.deleted_folders.contains(id)
    }
}
