//! Task creation, worker spawning and registry queries.

use crate::error::{Error, Result};
use crate::types::{NewTask, Status, Task, TaskId};
use std::sync::atomic::Ordering;

use super::worker::{WorkerContext, run_worker};
use super::{MediaDownloader, Registry};

impl MediaDownloader {
    /// Queue a new task and start its worker
    ///
    /// The worker waits for a concurrency slot on its own, so this returns
    /// immediately no matter how many tasks are already queued.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when the URL is empty
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn create_task(&self, request: NewTask) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if request.url.trim().is_empty() {
            return Err(Error::InvalidInput("url must not be empty".to_string()));
        }

        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let mut id = TaskId::generate();
        while registry.tasks.contains_key(&id) {
            id = TaskId::generate();
        }

        let task = Task::new(id.clone(), request);
        tracing::info!(task_id = %id, url = %task.url, format = %task.output_format, "task created");
        self.notifier.task_updated(&task);
        registry.tasks.insert(id.clone(), task);
        self.spawn_worker(registry, &id);

        Ok(id)
    }

    /// Start a worker for `id` and mark it live
    ///
    /// Must be called with the registry lock held so that at most one worker
    /// is ever bound to an id.
    pub(crate) fn spawn_worker(&self, registry: &mut Registry, id: &TaskId) {
        if !registry.workers.insert(id.clone()) {
            tracing::debug!(task_id = %id, "worker already running");
            return;
        }
        let control = registry.control(id).clone();
        let ctx = WorkerContext::new(self.clone(), id.clone(), control);
        tokio::spawn(run_worker(ctx));
    }

    /// Forward a start to the ledger and keep the first id it assigns
    pub(crate) async fn record_start(&self, task: &Task) {
        let Some(history_id) = self.notifier.record_start(task).await else {
            return;
        };
        let mut registry = self.registry.lock().await;
        if let Some(task) = registry.tasks.get_mut(&task.id)
            && task.history_id.is_none()
        {
            task.history_id = Some(history_id);
        }
    }

    /// Snapshot of one task
    pub async fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.registry.lock().await.tasks.get(id).cloned()
    }

    /// Snapshots of all tasks, oldest first
    pub async fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.registry.lock().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Drop every completed task from the registry
    ///
    /// Output files are kept; use [`remove`](Self::remove) to delete them.
    pub async fn clear_completed(&self) -> usize {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let completed: Vec<TaskId> = registry
            .tasks
            .values()
            .filter(|task| task.status == Status::Completed)
            .map(|task| task.id.clone())
            .collect();

        for id in &completed {
            registry.tasks.remove(id);
            registry.controls.remove(id);
            self.notifier.task_removed(id);
        }

        if !completed.is_empty() {
            tracing::info!(count = completed.len(), "cleared completed tasks");
        }
        completed.len()
    }

    /// Number of tasks currently `downloading`
    pub async fn active_count(&self) -> usize {
        self.registry
            .lock()
            .await
            .tasks
            .values()
            .filter(|task| task.status == Status::Downloading)
            .count()
    }
}
