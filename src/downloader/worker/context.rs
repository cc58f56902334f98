//! Worker context: shared state, checkpoints and the engine hook implementation.

use crate::engine::{EngineHooks, PhaseUpdate, TransferUpdate};
use crate::error::Interrupted;
use crate::progress::{Applied, ProgressModel};
use crate::types::{Status, Task, TaskId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tracing::debug;

use super::super::{MediaDownloader, TaskControl};

/// State shared by every step of one worker
pub(crate) struct WorkerContext {
    pub(super) downloader: MediaDownloader,
    pub(super) id: TaskId,
    pub(super) control: TaskControl,
    /// Concurrency slot; held only while the task may transfer
    slot: Mutex<Option<OwnedSemaphorePermit>>,
}

impl WorkerContext {
    pub(crate) fn new(downloader: MediaDownloader, id: TaskId, control: TaskControl) -> Self {
        Self {
            downloader,
            id,
            control,
            slot: Mutex::new(None),
        }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    /// Wait for a concurrency slot; `None` if the task is cancelled first
    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.downloader.concurrent_limit.clone();
        tokio::select! {
            biased;
            _ = self.control.cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        }
    }

    /// Give the concurrency slot back, if held
    pub(super) async fn release_slot(&self) {
        if self.slot.lock().await.take().is_some() {
            debug!(task_id = %self.id, "released concurrency slot");
        }
    }

    fn gate_open(&self) -> bool {
        *self.control.gate.borrow()
    }

    /// Pause/cancel checkpoint
    ///
    /// Returns once the pause gate is open and the worker holds a concurrency
    /// slot. A closed gate gives the slot back before parking, so a paused
    /// task never keeps a queued one waiting. Cancellation wakes every wait.
    pub(super) async fn checkpoint(&self) -> Result<(), Interrupted> {
        loop {
            if self.is_cancelled() {
                return Err(Interrupted);
            }
            self.wait_for_gate().await?;

            let mut slot = self.slot.lock().await;
            if slot.is_none() {
                *slot = Some(self.acquire_slot().await.ok_or(Interrupted)?);
            }
            drop(slot);

            // Paused again while queued for the slot
            if self.gate_open() && !self.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn wait_for_gate(&self) -> Result<(), Interrupted> {
        let mut gate = self.control.gate.subscribe();
        if *gate.borrow_and_update() {
            return Ok(());
        }

        self.release_slot().await;
        debug!(task_id = %self.id, "parked at pause gate");
        while !*gate.borrow_and_update() {
            tokio::select! {
                _ = self.control.cancel.cancelled() => return Err(Interrupted),
                changed = gate.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Current snapshot of the task
    pub(super) async fn snapshot(&self) -> Option<Task> {
        self.downloader.registry.lock().await.tasks.get(&self.id).cloned()
    }

    /// Apply `change` under the registry lock and emit the result
    ///
    /// Returns the new snapshot, or `None` when the task is gone or `change`
    /// declined (returned false).
    pub(super) async fn update(&self, change: impl FnOnce(&mut Task) -> bool) -> Option<Task> {
        let mut registry = self.downloader.registry.lock().await;
        let task = registry.tasks.get_mut(&self.id)?;
        if !change(task) {
            return None;
        }
        self.downloader.notifier.task_updated(task);
        Some(task.clone())
    }

    /// Leave the live-worker set; always the worker's last step
    pub(super) async fn deregister(&self) {
        self.downloader.registry.lock().await.workers.remove(&self.id);
        debug!(task_id = %self.id, "worker exited");
    }
}

/// [`EngineHooks`] that fold engine reports into the task
pub(super) struct CheckpointHooks<'a> {
    ctx: &'a WorkerContext,
    model: ProgressModel,
    /// Set until the first percent of this run is written
    fresh_run: AtomicBool,
}

impl<'a> CheckpointHooks<'a> {
    pub(super) fn new(ctx: &'a WorkerContext, model: ProgressModel, fresh_run: bool) -> Self {
        Self {
            ctx,
            model,
            fresh_run: AtomicBool::new(fresh_run),
        }
    }

    async fn apply(
        &self,
        fold: impl FnOnce(&ProgressModel, &mut Task, bool) -> Applied,
    ) -> Result<(), Interrupted> {
        self.ctx.checkpoint().await?;

        let fresh = self.fresh_run.load(Ordering::SeqCst);
        let written = {
            let mut registry = self.ctx.downloader.registry.lock().await;
            let Some(task) = registry.tasks.get_mut(&self.ctx.id) else {
                return Err(Interrupted);
            };
            // Paused after the gate was passed: skip, the next checkpoint parks
            if task.status != Status::Downloading {
                false
            } else {
                let before = task.stage;
                let applied = fold(&self.model, task, fresh);
                if applied.accepted {
                    if task.stage != before {
                        debug!(task_id = %task.id, stage = %task.stage, "stage changed");
                    }
                    self.ctx.downloader.notifier.task_updated(task);
                }
                applied.percent_written
            }
        };

        if written {
            self.fresh_run.store(false, Ordering::SeqCst);
        }
        if self.ctx.is_cancelled() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

#[async_trait]
impl EngineHooks for CheckpointHooks<'_> {
    async fn on_transfer(&self, update: TransferUpdate) -> Result<(), Interrupted> {
        self.apply(|model, task, fresh| model.apply_transfer(task, &update, fresh))
            .await
    }

    async fn on_phase(&self, update: PhaseUpdate) -> Result<(), Interrupted> {
        self.apply(|model, task, fresh| model.apply_phase(task, &update, fresh))
            .await
    }
}
