//! Shared test helpers: a scripted engine, a recording ledger and downloader setup.

use crate::config::{AudioFormat, Config};
use crate::downloader::MediaDownloader;
use crate::engine::{
    AcquisitionEngine, EngineHooks, EngineOutput, EngineRequest, PhaseUpdate, TransferUpdate,
};
use crate::error::{EngineError, Result};
use crate::notify::HistoryLedger;
use crate::types::{Status, Task, TaskId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::Semaphore;

/// One scripted engine action
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Report a transfer through the hooks
    Transfer(TransferUpdate),
    /// Report a post-processing phase through the hooks
    Phase(PhaseUpdate),
    /// Write the output file with this extension and report it as final
    WriteOutput(&'static str),
    /// Write `<stem>.<suffix>` next to the output (e.g. "mp4.part")
    WriteFragment(&'static str),
    /// Sleep
    Sleep(Duration),
    /// Block until [`MockEngine::release`] hands out a permit
    Hold,
    /// Fail with an engine message
    Fail(&'static str),
}

/// Steps of a successful 1000-byte transfer in quarters
pub(crate) fn successful_transfer(ext: &'static str) -> Vec<Step> {
    vec![
        Step::Transfer(TransferUpdate::downloading(0, Some(1000))),
        Step::Transfer(TransferUpdate::downloading(250, Some(1000))),
        Step::Transfer(TransferUpdate::downloading(500, Some(1000))),
        Step::Transfer(TransferUpdate::downloading(750, None)),
        Step::Transfer(TransferUpdate::finished(1000)),
        Step::WriteOutput(ext),
    ]
}

/// Scripted [`AcquisitionEngine`]
///
/// Each `acquire` call plays the next queued script, or the default script
/// once the queue is empty. Every request is recorded.
pub(crate) struct MockEngine {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    default_script: Vec<Step>,
    merge_available: bool,
    requests: Mutex<Vec<EngineRequest>>,
    extractions: Mutex<Vec<(PathBuf, PathBuf, AudioFormat)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    release: Semaphore,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            default_script: successful_transfer("mp4"),
            merge_available: true,
            requests: Mutex::new(Vec::new()),
            extractions: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            release: Semaphore::new(0),
        }
    }

    pub(crate) fn without_merge_tool(mut self) -> Self {
        self.merge_available = false;
        self
    }

    pub(crate) fn with_default_script(mut self, script: Vec<Step>) -> Self {
        self.default_script = script;
        self
    }

    /// Queue a script for the next `acquire` call
    pub(crate) fn push_script(&self, script: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Let `n` held engine calls continue
    pub(crate) fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub(crate) fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn extractions(&self) -> Vec<(PathBuf, PathBuf, AudioFormat)> {
        self.extractions.lock().unwrap().clone()
    }

    /// Most engine calls ever running at once
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn play(
        &self,
        script: Vec<Step>,
        request: &EngineRequest,
        hooks: &dyn EngineHooks,
    ) -> std::result::Result<EngineOutput, EngineError> {
        let mut output = EngineOutput::default();
        for step in script {
            match step {
                Step::Transfer(update) => hooks.on_transfer(update).await?,
                Step::Phase(update) => hooks.on_phase(update).await?,
                Step::WriteOutput(ext) => {
                    let path = expand(&request.output_template, ext);
                    tokio::fs::write(&path, b"media").await?;
                    output.final_path = Some(path);
                }
                Step::WriteFragment(suffix) => {
                    tokio::fs::write(expand(&request.output_template, suffix), b"part").await?;
                }
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Hold => {
                    if let Ok(permit) = self.release.acquire().await {
                        permit.forget();
                    }
                }
                Step::Fail(message) => return Err(EngineError::Failed(message.to_string())),
            }
        }
        Ok(output)
    }
}

/// Fill the `%(ext)s` placeholder of an output template
pub(crate) fn expand(template: &str, ext: &str) -> PathBuf {
    PathBuf::from(template.replace("%(ext)s", ext).replace("%%", "%"))
}

#[async_trait]
impl AcquisitionEngine for MockEngine {
    async fn acquire(
        &self,
        request: &EngineRequest,
        hooks: &dyn EngineHooks,
    ) -> std::result::Result<EngineOutput, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let result = self.play(script, request, hooks).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn extract_audio(
        &self,
        source: &Path,
        dest: &Path,
        format: AudioFormat,
    ) -> std::result::Result<(), EngineError> {
        self.extractions
            .lock()
            .unwrap()
            .push((source.to_path_buf(), dest.to_path_buf(), format));
        tokio::fs::write(dest, b"audio").await?;
        Ok(())
    }

    fn merge_tool_available(&self) -> bool {
        self.merge_available
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// In-memory [`HistoryLedger`] that records every call
#[derive(Default)]
pub(crate) struct RecordingLedger {
    next_id: AtomicI64,
    pub(crate) starts: Mutex<Vec<Task>>,
    pub(crate) finishes: Mutex<Vec<Task>>,
}

#[async_trait]
impl HistoryLedger for RecordingLedger {
    async fn record_start(&self, task: &Task) -> Result<Option<i64>> {
        self.starts.lock().unwrap().push(task.clone());
        Ok(Some(
            task.history_id
                .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        ))
    }

    async fn record_finish(&self, task: &Task) -> Result<()> {
        self.finishes.lock().unwrap().push(task.clone());
        Ok(())
    }
}

/// Config rooted in `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.persistence.state_path = dir.join("state.json");
    config.persistence.history_db_path = dir.join("history.db");
    config
}

/// Downloader over the default mock engine; keep the tempdir alive
pub(crate) fn create_test_downloader() -> (MediaDownloader, Arc<MockEngine>, TempDir) {
    create_test_downloader_with(MockEngine::new(), |_| {})
}

/// Downloader over `engine` with config tweaks
pub(crate) fn create_test_downloader_with(
    engine: MockEngine,
    configure: impl FnOnce(&mut Config),
) -> (MediaDownloader, Arc<MockEngine>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let engine = Arc::new(engine);
    let downloader = MediaDownloader::new(config, engine.clone());
    (downloader, engine, temp_dir)
}

/// Poll until `check` accepts the task (5 s timeout)
pub(crate) async fn wait_for_task(
    downloader: &MediaDownloader,
    id: &TaskId,
    check: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = downloader.get_task(id).await;
        if let Some(task) = task.as_ref().filter(|t| check(t)) {
            return task.clone();
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for task {id}: {task:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the task reaches `status`
pub(crate) async fn wait_for_status(
    downloader: &MediaDownloader,
    id: &TaskId,
    status: Status,
) -> Task {
    wait_for_task(downloader, id, |task| task.status == status).await
}

/// Poll until no worker is bound to `id`
pub(crate) async fn wait_for_worker_exit(downloader: &MediaDownloader, id: &TaskId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while downloader.registry.lock().await.workers.contains(id) {
        if tokio::time::Instant::now() > deadline {
            panic!("worker for {id} never exited");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
