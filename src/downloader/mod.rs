//! Task registry and worker pool, split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`tasks`] - Task creation and registry queries
//! - [`control`] - Pause, resume, cancel and removal
//! - [`lifecycle`] - State save/load and shutdown
//! - [`worker`] - Per-task execution against the acquisition engine

mod control;
mod lifecycle;
mod tasks;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::engine::{AcquisitionEngine, YtDlpEngine};
use crate::error::Result;
use crate::notify::{HistoryLedger, Notifier};
use crate::types::{Task, TaskId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1000;

/// Pause gate and cancellation flag of one task
#[derive(Clone)]
pub(crate) struct TaskControl {
    /// `true` while the task may run; workers park at checkpoints when `false`
    pub(crate) gate: Arc<watch::Sender<bool>>,
    /// Raised by `cancel`; replaced with a fresh token on resume
    pub(crate) cancel: CancellationToken,
}

impl TaskControl {
    pub(crate) fn new() -> Self {
        let (gate, _rx) = watch::channel(true);
        Self {
            gate: Arc::new(gate),
            cancel: CancellationToken::new(),
        }
    }
}

/// Everything guarded by the registry lock
///
/// The lock is never held across an engine call or a file-system await.
#[derive(Default)]
pub(crate) struct Registry {
    /// All known tasks
    pub(crate) tasks: HashMap<TaskId, Task>,
    /// Pause/cancel bookkeeping per task
    pub(crate) controls: HashMap<TaskId, TaskControl>,
    /// Ids with a live worker (at most one each)
    pub(crate) workers: HashSet<TaskId>,
}

impl Registry {
    /// Control for `id`, created on first use
    pub(crate) fn control(&mut self, id: &TaskId) -> &mut TaskControl {
        self.controls.entry(id.clone()).or_insert_with(TaskControl::new)
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use media_dl::{Config, MediaDownloader, NewTask};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::open(Config::default()).await?;
///
///     let mut events = downloader.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{:?}", event);
///         }
///     });
///
///     let id = downloader
///         .create_task(NewTask::new("https://example.com/watch?v=abc", "Example"))
///         .await?;
///     println!("queued {id}");
///
///     downloader.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MediaDownloader {
    /// Configuration (shared with workers)
    pub(crate) config: Arc<Config>,
    /// Engine that performs the transfers
    pub(crate) engine: Arc<dyn AcquisitionEngine>,
    /// Event fan-out and history forwarding
    pub(crate) notifier: Notifier,
    /// Caps simultaneously transferring workers
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Tasks, controls and live workers
    pub(crate) registry: Arc<Mutex<Registry>>,
    /// Cleared by `shutdown`
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl MediaDownloader {
    /// Create a downloader around `engine`
    ///
    /// No worker runs until a task is created or resumed. A concurrency limit
    /// below one is raised to one.
    pub fn new(config: Config, engine: Arc<dyn AcquisitionEngine>) -> Self {
        let limit = config.download.max_concurrent_downloads.max(1);
        tracing::info!(
            engine = engine.name(),
            max_concurrent = limit,
            merge_available = engine.merge_tool_available(),
            "media downloader initialized"
        );

        Self {
            config: Arc::new(config),
            engine,
            notifier: Notifier::new(EVENT_CAPACITY),
            concurrent_limit: Arc::new(Semaphore::new(limit)),
            registry: Arc::new(Mutex::new(Registry::default())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach a history ledger
    pub fn with_history(mut self, ledger: Arc<dyn HistoryLedger>) -> Self {
        self.notifier = self.notifier.with_ledger(ledger);
        self
    }

    /// Build a fully wired downloader from configuration
    ///
    /// Validates `config`, discovers yt-dlp/ffmpeg, opens the history database
    /// and restores the saved task list.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                crate::Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        let engine = YtDlpEngine::discover(&config.tools)?;
        let db = Database::new(&config.persistence.history_db_path).await?;

        let downloader = Self::new(config, Arc::new(engine)).with_history(Arc::new(db));
        let restored = downloader.load_state().await?;
        tracing::info!(restored, "restored tasks from previous session");

        Ok(downloader)
    }

    /// Subscribe to task events
    ///
    /// Every subscriber receives every event. A subscriber that falls more than
    /// 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::Event> {
        self.notifier.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
