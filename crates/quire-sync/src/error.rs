//! Engine error types.

use thiserror::Error;

use quire_store::StoreError;

use crate::remote::RemoteError;

/// Errors surfaced by [`SyncEngine`](crate::SyncEngine) operations.
///
/// Transient remote failures never appear here: the write path turns them
/// into queued writes and the flush engine retries them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local mirror failed. There is no fallback beneath it.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The service gave a definitive refusal; nothing was queued.
    #[error("remote refused the write: {0}")]
    Remote(#[from] RemoteError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("the default folder cannot be deleted")]
    DefaultFolder,

    #[error("no default folder in the mirror")]
    NoDefaultFolder,

    #[error("sync trigger has shut down")]
    Shutdown,

    #[error("flush failed: {0}")]
    Flush(String),
}

impl SyncError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
