//! Offline-first sync engine for quire.
//!
//! A [`SyncEngine`] sits between callers and a remote notes service:
//!
//! ```text
//!   caller ──▶ write path ──▶ remote ──ok──▶ mirror
//!                  │                 └─down─▶ mirror + outbox
//!                  │
//!   signal ──▶ SyncTrigger ──▶ flush ──▶ remote ──▶ mirror ──▶ EventBus
//!
//!   caller ──▶ read path ──▶ mirror (now)
//!                        └─▶ background refresh ──▶ mirror ──▶ EventBus
//! ```
//!
//! | Module       | Role                                                     |
//! |--------------|----------------------------------------------------------|
//! | `read`       | cache-first reads with detached refresh                  |
//! | `write`      | optimistic writes, outbox on transient failure           |
//! | `flush`      | ordered outbox replay, conflict snapshots                |
//! | `reconcile`  | temporary folder id rewrites, folder delete cascade      |
//! | `history`    | append-only content snapshots                            |
//! | `trigger`    | actor turning online/save/startup signals into flushes   |
//! | `events`     | subject-addressed broadcast of mirror changes            |
//! | `remote`     | service trait, error taxonomy, HTTP and in-memory impls  |

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod flush;
pub mod history;
pub mod read;
pub mod reconcile;
pub mod remote;
pub mod trigger;
pub mod write;

pub use config::{ConfigError, RemoteConfig, StoreConfig, SyncConfig, TOKEN_ENV};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, EventMessage, Subscription, SyncEvent, matches_pattern};
pub use flush::FlushReport;
pub use read::{Cached, NoteFilter, RefreshHandle};
pub use reconcile::Reconciled;
pub use remote::{
    HttpRemote, MemoryRemote, NoteQuery, RemoteCall, RemoteError, RemoteFolder, RemoteNote,
    RemoteResult, RemoteService, RemoteSettings,
};
pub use trigger::{SyncTrigger, TriggerHandle, TriggerSignal};
pub use write::{NewNote, WriteOutcome};
