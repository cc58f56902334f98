//! State save/load and shutdown coordination.

use crate::error::Result;
use crate::state;
use crate::types::{Status, Task, TaskId};
use std::sync::atomic::Ordering;

use super::MediaDownloader;

impl MediaDownloader {
    /// Gracefully shut down the downloader
    ///
    /// 1. Stops accepting new tasks
    /// 2. Pauses every downloading task and closes the gate of queued ones, so
    ///    workers park at their next checkpoint
    /// 3. Saves the task list to the state file
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written. Steps 1 and 2
    /// have already taken effect by then.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let paused = self.pause_all().await;
        let held = self.hold_pending().await;
        tracing::info!(paused, held, "Parked all active workers");

        let saved = self.save_state().await?;
        tracing::info!(saved, "Graceful shutdown complete");
        Ok(())
    }

    /// Close the gate of every pending task so queued workers never start
    async fn hold_pending(&self) -> usize {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let pending: Vec<TaskId> = registry
            .tasks
            .values()
            .filter(|task| task.status == Status::Pending)
            .map(|task| task.id.clone())
            .collect();
        for id in &pending {
            registry.control(id).gate.send_replace(false);
            tracing::debug!(task_id = %id, "holding queued task");
        }
        pending.len()
    }

    /// Write every task to the state file
    ///
    /// Queued and running tasks are written as `paused`; the file is replaced
    /// atomically. Returns the number of tasks written.
    pub async fn save_state(&self) -> Result<usize> {
        let tasks: Vec<Task> = self.list_tasks().await.iter().map(state::snapshot).collect();

        let path = &self.config.persistence.state_path;
        state::write_state(path, &tasks).await?;
        tracing::info!(count = tasks.len(), path = ?path, "state saved");
        Ok(tasks.len())
    }

    /// Restore tasks from the state file
    ///
    /// Restored tasks get no worker: anything that was queued or running comes
    /// back `paused` and waits for [`resume`](Self::resume). Entries without a
    /// URL, entries whose id is already registered and damaged entries are
    /// skipped. Returns the number of tasks restored.
    pub async fn load_state(&self) -> Result<usize> {
        let path = &self.config.persistence.state_path;
        let entries = state::read_entries(path).await?;

        let mut registry = self.registry.lock().await;
        let mut restored = 0;
        for (index, entry) in entries.iter().enumerate() {
            let task = state::restore_task(entry, || {
                let mut id = TaskId::generate();
                while registry.tasks.contains_key(&id) {
                    id = TaskId::generate();
                }
                id
            });
            let Some(task) = task else {
                tracing::warn!(index, path = ?path, "skipping unusable state entry");
                continue;
            };
            if registry.tasks.contains_key(&task.id) {
                tracing::debug!(task_id = %task.id, "task already registered, skipping");
                continue;
            }

            self.notifier.task_updated(&task);
            registry.tasks.insert(task.id.clone(), task);
            restored += 1;
        }

        tracing::info!(restored, total = entries.len(), path = ?path, "state loaded");
        Ok(restored)
    }
}
