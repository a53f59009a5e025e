//! Engine event bus.
//!
//! Listeners (UI panes, background schedulers) learn that mirror state changed
//! by subscribing to subjects. Events carry no record data; a listener re-reads
//! the mirror through the read path.
//!
//! # Subjects
//!
//! | Subject              | Fired after                                     |
//! |----------------------|-------------------------------------------------|
//! | `notes.refreshed`    | a note refresh merge or a note replay           |
//! | `folders.refreshed`  | a folder refresh merge or a folder replay       |
//! | `settings.updated`   | a settings write (direct, queued or replayed)   |
//! | `settings.refreshed` | a settings refresh merge                        |
//! | `outbox.flushed`     | a flush run that found queued entries           |
//!
//! Patterns use dot-separated tokens: `*` matches exactly one token, `>`
//! matches one or more trailing tokens.

use std::time::Instant;

use tokio::sync::broadcast;

// ============================================================================
// Pattern Matching
// ============================================================================

/// Whether `subject` falls under the subscription `pattern`.
///
/// Empty tokens never match, so `""`, `"notes."` and `"..."` select
/// nothing. A `>` anywhere but last makes the pattern match nothing.
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let mut wanted = pattern.split('.').peekable();
    let mut actual = subject.split('.');

    while let Some(want) = wanted.next() {
        if want.is_empty() {
            return false;
        }
        if want == ">" {
            if wanted.peek().is_some() {
                return false;
            }
            let rest: Vec<&str> = actual.collect();
            return !rest.is_empty() && rest.iter().all(|t| !t.is_empty());
        }
        match actual.next() {
            Some(got) if !got.is_empty() && (want == "*" || want == got) => {}
            _ => return false,
        }
    }
    actual.next().is_none()
}

// ============================================================================
// Events
// ============================================================================

/// Something in the mirror changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    NotesRefreshed,
    FoldersRefreshed,
    SettingsUpdated,
    SettingsRefreshed,
    OutboxFlushed { replayed: usize, remaining: usize },
}

impl SyncEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            SyncEvent::NotesRefreshed => "notes.refreshed",
            SyncEvent::FoldersRefreshed => "folders.refreshed",
            SyncEvent::SettingsUpdated => "settings.updated",
            SyncEvent::SettingsRefreshed => "settings.refreshed",
            SyncEvent::OutboxFlushed { .. } => "outbox.flushed",
        }
    }
}

/// A published event with its subject and publish time.
#[derive(Clone, Debug)]
pub struct EventMessage {
    pub subject: &'static str,
    pub event: SyncEvent,
    pub timestamp: Instant,
}

impl EventMessage {
    fn new(event: SyncEvent) -> Self {
        Self {
            subject: event.subject(),
            event,
            timestamp: Instant::now(),
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Broadcast bus owned by one engine instance.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventMessage>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns how many subscribers it reached; having
    /// none is not an error.
    pub fn publish(&self, event: SyncEvent) -> usize {
        tracing::trace!(subject = event.subject(), "publish");
        self.tx.send(EventMessage::new(event)).unwrap_or(0)
    }

    /// Subscribe to events whose subject matches `pattern`.
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A pattern-filtered view of the bus.
pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<EventMessage>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next matching event.
    ///
    /// Returns None once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Receive a matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv().map(|msg| msg.event)).collect()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
