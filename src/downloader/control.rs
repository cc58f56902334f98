//! Task lifecycle control: pause, resume, cancel, remove.
//!
//! Every operation returns `false` (and changes nothing) when the task is
//! unknown or its status does not allow the operation.

use crate::cleanup;
use crate::error::{Error, Result};
use crate::types::{Stage, Status, TaskId};
use tokio_util::sync::CancellationToken;

use super::MediaDownloader;

impl MediaDownloader {
    /// Pause a downloading task
    ///
    /// Closes the task's pause gate; its worker parks at the next progress
    /// checkpoint. Only a `downloading` task can be paused.
    pub async fn pause(&self, id: &TaskId) -> bool {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let Some(task) = registry.tasks.get_mut(id) else {
            return false;
        };
        if task.status != Status::Downloading || !task.transition(Stage::Paused) {
            return false;
        }
        task.progress.speed = 0.0;
        task.progress.eta = None;

        if let Some(control) = registry.controls.get(id) {
            control.gate.send_replace(false);
        }
        self.notifier.task_updated(task);
        tracing::info!(task_id = %id, "task paused");
        true
    }

    /// Resume a paused task
    ///
    /// Reopens the gate of a parked worker, or starts a new worker when none
    /// is alive (restored tasks). A new worker re-invokes the engine with the
    /// task's known output path so the transfer continues where the engine
    /// supports it.
    pub async fn resume(&self, id: &TaskId) -> bool {
        let (snapshot, spawned) = {
            let mut guard = self.registry.lock().await;
            let registry = &mut *guard;

            let Some(task) = registry.tasks.get_mut(id) else {
                return false;
            };
            if task.status != Status::Paused || !task.transition(Stage::Downloading) {
                return false;
            }
            task.error_message.clear();
            let snapshot = task.clone();
            self.notifier.task_updated(task);

            let control = registry.control(id);
            if control.cancel.is_cancelled() {
                control.cancel = CancellationToken::new();
            }
            control.gate.send_replace(true);

            let spawned = !registry.workers.contains(id);
            if spawned {
                self.spawn_worker(registry, id);
            }
            (snapshot, spawned)
        };

        tracing::info!(task_id = %id, new_worker = spawned, "task resumed");
        // A new worker records its own start
        if !spawned {
            self.record_start(&snapshot).await;
        }
        true
    }

    /// Cancel a task
    ///
    /// The task is marked `cancelled` immediately. A live worker is woken (even
    /// from a closed pause gate), stops at its next checkpoint and removes the
    /// partial output itself. Without a live worker the output file and its
    /// fragments are removed here.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let (snapshot, orphaned) = {
            let mut guard = self.registry.lock().await;
            let registry = &mut *guard;

            let Some(task) = registry.tasks.get_mut(id) else {
                return false;
            };
            if matches!(task.status, Status::Completed | Status::Cancelled)
                || !task.transition(Stage::Cancelled)
            {
                return false;
            }
            task.error_message.clear();
            task.progress.speed = 0.0;
            task.progress.eta = None;
            let snapshot = task.clone();

            if let Some(control) = registry.controls.get(id) {
                control.cancel.cancel();
                control.gate.send_replace(true);
            }
            self.notifier.task_updated(&snapshot);
            (snapshot, !registry.workers.contains(id))
        };

        tracing::info!(task_id = %id, "task cancelled");
        if orphaned {
            cleanup::remove_artifacts(id, snapshot.output_path.as_deref(), None).await;
            self.notifier.record_finish(&snapshot).await;
        }
        true
    }

    /// Remove a finished task and its files
    ///
    /// Only tasks in a terminal status can be removed, and not while their
    /// worker is still winding down (a cancelled task keeps its worker until
    /// the partial output is gone). Deletes the output file, the audio sidecar
    /// and leftover fragments, then forgets the task.
    pub async fn remove(&self, id: &TaskId) -> bool {
        match self.try_remove(id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(task_id = %id, error = %e, "remove refused");
                false
            }
        }
    }

    /// [`remove`](Self::remove) with the reason it was refused
    pub(crate) async fn try_remove(&self, id: &TaskId) -> Result<()> {
        let task = {
            let registry = self.registry.lock().await;
            let task = registry
                .tasks
                .get(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if !task.status.is_terminal() {
                return Err(invalid_state(id, "remove", task.status.to_string()));
            }
            if registry.workers.contains(id) {
                return Err(invalid_state(
                    id,
                    "remove",
                    format!("{} (worker still running)", task.status),
                ));
            }
            task.clone()
        };

        cleanup::remove_artifacts(id, task.output_path.as_deref(), task.audio_path.as_deref())
            .await;

        let mut registry = self.registry.lock().await;
        if registry.tasks.remove(id).is_none() {
            // Removed concurrently
            return Err(Error::NotFound(id.to_string()));
        }
        registry.controls.remove(id);
        self.notifier.task_removed(id);
        tracing::info!(task_id = %id, "task removed");
        Ok(())
    }

    /// Pause every downloading task; returns how many were paused
    pub async fn pause_all(&self) -> usize {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let mut paused = 0;
        for task in registry.tasks.values_mut() {
            if task.status != Status::Downloading || !task.transition(Stage::Paused) {
                continue;
            }
            task.progress.speed = 0.0;
            task.progress.eta = None;
            if let Some(control) = registry.controls.get(&task.id) {
                control.gate.send_replace(false);
            }
            self.notifier.task_updated(task);
            paused += 1;
        }

        if paused > 0 {
            tracing::info!(count = paused, "paused all downloading tasks");
        }
        paused
    }

    /// Resume every paused task; returns how many were resumed
    pub async fn resume_all(&self) -> usize {
        let paused: Vec<TaskId> = {
            let registry = self.registry.lock().await;
            let mut paused: Vec<_> = registry
                .tasks
                .values()
                .filter(|task| task.status == Status::Paused)
                .map(|task| (task.created_at, task.id.clone()))
                .collect();
            paused.sort();
            paused.into_iter().map(|(_, id)| id).collect()
        };

        let mut resumed = 0;
        for id in &paused {
            if self.resume(id).await {
                resumed += 1;
            }
        }
        resumed
    }
}

fn invalid_state(id: &TaskId, operation: &str, current_state: String) -> Error {
    Error::InvalidState {
        id: id.to_string(),
        operation: operation.to_string(),
        current_state,
    }
}
