//! Flush trigger actor.
//!
//! ```text
//!   TriggerHandle (Clone)        mpsc        TriggerActor (tokio task)
//!   ┌─────────────────────┐  ──────────▶  ┌──────────────────────────────┐
//!   │ .online()           │               │ startup flush                │
//!   │ .save()             │               │ coalesce queued signals      │
//!   │ .flush_now()        │  ◀──────────  │ optional interval ticks      │
//!   └─────────────────────┘    oneshot    └──────────────────────────────┘
//! ```
//!
//! Signals that pile up while a flush is running are folded into a single
//! follow-up run.

use strum::{Display, EnumString, IntoStaticStr};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::flush::FlushReport;

/// Why a flush was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TriggerSignal {
    Startup,
    /// Connectivity came back.
    Online,
    /// The user saved explicitly.
    Save,
    Interval,
    Manual,
}

impl TriggerSignal {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum TriggerCommand {
    Signal(TriggerSignal),
    FlushNow {
        reply: oneshot::Sender<SyncResult<FlushReport>>,
    },
    Shutdown,
}

// ============================================================================
// TriggerHandle
// ============================================================================

/// Cloneable handle to a running [`SyncTrigger`].
#[derive(Clone, Debug)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<TriggerCommand>,
}

impl TriggerHandle {
    /// Connectivity was restored.
    pub fn online(&self) -> SyncResult<()> {
        self.signal(TriggerSignal::Online)
    }

    /// The user saved explicitly.
    pub fn save(&self) -> SyncResult<()> {
        self.signal(TriggerSignal::Save)
    }

    pub fn signal(&self, signal: TriggerSignal) -> SyncResult<()> {
        self.tx
            .send(TriggerCommand::Signal(signal))
            .map_err(|_| SyncError::Shutdown)
    }

    /// Request a flush and wait for its report.
    ///
    /// If other signals are queued at the same time they share this run.
    pub async fn flush_now(&self) -> SyncResult<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TriggerCommand::FlushNow { reply })
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Ask the actor to stop after the current flush.
    pub fn shutdown(&self) -> SyncResult<()> {
        self.tx
            .send(TriggerCommand::Shutdown)
            .map_err(|_| SyncError::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// SyncTrigger
// ============================================================================

/// Owns the trigger actor task.
#[derive(Debug)]
pub struct SyncTrigger {
    handle: TriggerHandle,
    task: JoinHandle<()>,
}

impl SyncTrigger {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(engine: SyncEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = engine.config().flush_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let actor = TriggerActor { engine, interval };
        let task = tokio::spawn(actor.run(rx));
        Self {
            handle: TriggerHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Stop the actor and wait for it to exit.
    pub async fn shutdown(self) {
        // Already closed means the actor is gone; the join below still settles.
        let _ = self.handle.shutdown();
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync trigger task failed");
        }
    }
}

// ============================================================================
// TriggerActor (internal)
// ============================================================================

struct TriggerActor {
    engine: SyncEngine,
    interval: Option<Interval>,
}

/// One coalesced batch of commands.
#[derive(Default)]
struct Pending {
    signals: Vec<TriggerSignal>,
    waiters: Vec<oneshot::Sender<SyncResult<FlushReport>>>,
    shutdown: bool,
}

impl Pending {
    fn absorb(&mut self, cmd: TriggerCommand) {
        match cmd {
            TriggerCommand::Signal(signal) => self.signals.push(signal),
            TriggerCommand::FlushNow { reply } => {
                self.signals.push(TriggerSignal::Manual);
                self.waiters.push(reply);
            }
            TriggerCommand::Shutdown => self.shutdown = true,
        }
    }
}

impl TriggerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TriggerCommand>) {
        if self.engine.config().flush_on_startup {
            self.flush(&[TriggerSignal::Startup], Vec::new()).await;
        }

        loop {
            let first = tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
                _ = next_tick(&mut self.interval) => TriggerCommand::Signal(TriggerSignal::Interval),
            };

            let mut pending = Pending::default();
            pending.absorb(first);
            while let Ok(cmd) = rx.try_recv() {
                pending.absorb(cmd);
            }

            if !pending.signals.is_empty() {
                self.flush(&pending.signals, pending.waiters).await;
            }
            if pending.shutdown {
                break;
            }
        }
        debug!("sync trigger stopped");
    }

    async fn flush(
        &self,
        signals: &[TriggerSignal],
        waiters: Vec<oneshot::Sender<SyncResult<FlushReport>>>,
    ) {
        let reasons: Vec<&str> = signals.iter().map(TriggerSignal::as_str).collect();
        debug!(signals = ?reasons, "flush triggered");

        let result = self.engine.flush().await;
        match &result {
            Ok(report) if report.attempted() > 0 => info!(
                signals = ?reasons,
                replayed = report.replayed,
                failed = report.failed,
                "triggered flush done"
            ),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "triggered flush failed"),
        }

        let shared = result.as_ref().map_err(|err| err.to_string()).cloned();
        let mut result = Some(result);
        for reply in waiters {
            // The first waiter gets the original error; the rest a copy of its message.
            let outcome = match result.take() {
                Some(original) => original,
                None => shared.clone().map_err(SyncError::Flush),
            };
            let _ = reply.send(outcome);
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use crate::events::SyncEvent;
    use crate::remote::MemoryRemote;
    use crate::write::NewNote;
    use quire_store::Mirror;
    use quire_types::Sealed;

    async fn engine(config: SyncConfig) -> (SyncEngine, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(Mirror::in_memory(), remote.clone(), config);
        engine.folders().await.unwrap().settled().await;
        (engine, remote)
    }

    fn flushed(events: &[SyncEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SyncEvent::OutboxFlushed { .. }))
            .count()
    }

    #[tokio::test]
    async fn startup_flush_replays_queue() {
        let (engine, remote) = engine(SyncConfig::default()).await;
        remote.set_online(false);
        let note = engine
            .create_note(NewNote::new(Sealed::new(b"x".to_vec(), b"n".to_vec()), 1))
            .await
            .unwrap()
            .value;
        remote.set_online(true);

        let trigger = SyncTrigger::spawn(engine.clone());
        let report = trigger.handle().flush_now().await.unwrap();
        // The startup run already emptied the outbox.
        assert_eq!(report, FlushReport::default());
        assert!(remote.note(&note.id).is_some());
        trigger.shutdown().await;
    }

    #[tokio::test]
    async fn queued_signals_coalesce_into_one_run() {
        let (engine, remote) = engine(SyncConfig::default().with_flush_on_startup(false)).await;
        remote.set_online(false);
        engine
            .create_note(NewNote::new(Sealed::new(b"x".to_vec(), b"n".to_vec()), 1))
            .await
            .unwrap();

        let mut sub = engine.subscribe("outbox.flushed");
        let trigger = SyncTrigger::spawn(engine.clone());
        let handle = trigger.handle();
        // Nothing has polled the actor yet, so all of these are queued together.
        handle.online().unwrap();
        handle.save().unwrap();
        handle.online().unwrap();
        let report = handle.flush_now().await.unwrap();
        assert_eq!(report.failed, 1);

        assert_eq!(flushed(&sub.drain()), 1);
        trigger.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interval_triggers_flush() {
        let config = SyncConfig::default()
            .with_flush_on_startup(false)
            .with_flush_interval(Duration::from_secs(60));
        let (engine, remote) = engine(config).await;
        remote.set_online(false);
        engine
            .create_note(NewNote::new(Sealed::new(b"x".to_vec(), b"n".to_vec()), 1))
            .await
            .unwrap();
        remote.set_online(true);

        let mut sub = engine.subscribe("outbox.flushed");
        let trigger = SyncTrigger::spawn(engine.clone());
        let message = tokio::time::timeout(Duration::from_secs(120), sub.recv())
            .await
            .unwrap();
        assert_eq!(
            message.map(|m| m.event),
            Some(SyncEvent::OutboxFlushed {
                replayed: 1,
                remaining: 0
            })
        );
        trigger.shutdown().await;
    }

    #[test]
    fn signal_names() {
        assert_eq!(TriggerSignal::Online.as_str(), "online");
        assert_eq!(TriggerSignal::Interval.to_string(), "interval");
        assert_eq!("save".parse::<TriggerSignal>().ok(), Some(TriggerSignal::Save));
    }

    #[tokio::test]
    async fn handle_reports_shutdown() {
        let (engine, _remote) = engine(SyncConfig::default().with_flush_on_startup(false)).await;
        let trigger = SyncTrigger::spawn(engine);
        let handle = trigger.handle();
        trigger.shutdown().await;
        assert!(handle.is_closed());
        assert!(matches!(handle.save(), Err(SyncError::Shutdown)));
        assert!(matches!(handle.flush_now().await, Err(SyncError::Shutdown)));
    }
}
