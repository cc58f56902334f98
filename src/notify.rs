//! Notification hook: event fan-out and history ledger forwarding

use crate::error::Result;
use crate::types::{Event, Task, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Persistent record of task attempts
///
/// Implemented by [`Database`](crate::db::Database); tests use in-memory fakes.
#[async_trait]
pub trait HistoryLedger: Send + Sync {
    /// Record that `task` started (or restarted); returns the record id
    ///
    /// Called with `task.history_id` already set on restarts, in which case the
    /// implementation should update that record instead of creating another.
    async fn record_start(&self, task: &Task) -> Result<Option<i64>>;

    /// Record `task`'s final state
    async fn record_finish(&self, task: &Task) -> Result<()>;
}

/// Fans task snapshots out to subscribers and forwards lifecycle edges to the ledger
///
/// Delivery is best-effort: having no subscribers, or a subscriber that lags,
/// never fails the caller. Ledger errors are logged and swallowed.
#[derive(Clone)]
pub struct Notifier {
    event_tx: broadcast::Sender<Event>,
    ledger: Option<Arc<dyn HistoryLedger>>,
}

impl Notifier {
    /// Create a notifier with a broadcast buffer of `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            event_tx,
            ledger: None,
        }
    }

    /// Attach a history ledger
    pub fn with_ledger(mut self, ledger: Arc<dyn HistoryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit a snapshot of `task`
    pub fn task_updated(&self, task: &Task) {
        self.event_tx
            .send(Event::TaskUpdated {
                task: Box::new(task.clone()),
            })
            .ok();
    }

    /// Emit a removal
    pub fn task_removed(&self, id: &TaskId) {
        self.event_tx
            .send(Event::TaskRemoved { id: id.clone() })
            .ok();
    }

    /// Forward a start to the ledger; `None` without a ledger or on failure
    pub async fn record_start(&self, task: &Task) -> Option<i64> {
        let ledger = self.ledger.as_ref()?;
        match ledger.record_start(task).await {
            Ok(id) => id,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to record task start");
                None
            }
        }
    }

    /// Forward a final state to the ledger
    pub async fn record_finish(&self, task: &Task) {
        let Some(ledger) = self.ledger.as_ref() else {
            return;
        };
        if let Err(e) = ledger.record_finish(task).await {
            warn!(task_id = %task.id, error = %e, "failed to record task finish");
        }
    }
}
