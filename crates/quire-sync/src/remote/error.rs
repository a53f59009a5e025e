//! Remote failure taxonomy.

use thiserror::Error;

/// Why a call to the remote service failed.
///
/// Transient failures (the service could not be reached, or it could not
/// answer right now) mean "try again later": the write path falls back to
/// the outbox and the flush engine keeps the entry queued. Everything else is
/// a definitive answer from the service and is never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// DNS, connect, TLS or a dropped connection.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// 5xx, 408 or 429.
    #[error("server unavailable ({status})")]
    Server { status: u16 },

    /// Any other 4xx: the service understood the request and refused it.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The addressed entity does not exist on the service.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Connectivity(_) | RemoteError::Timeout | RemoteError::Server { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>, target: &str) -> Self {
        match status {
            404 | 410 => RemoteError::NotFound(target.to_string()),
            408 | 429 => RemoteError::Server { status },
            500..=599 => RemoteError::Server { status },
            _ => RemoteError::Rejected {
                status,
                message: message.into(),
            },
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status,
            message: message.into(),
        }
    }
}
