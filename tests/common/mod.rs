//! Common test utilities for media-dl integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use media_dl::config::AudioFormat;
use media_dl::engine::{EngineHooks, EngineOutput, EngineRequest, TransferUpdate};
use media_dl::{AcquisitionEngine, Config, EngineError, MediaDownloader, Status, Task, TaskId};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Config with every path under `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.persistence.state_path = dir.join("state").join("tasks.json");
    config.persistence.history_db_path = dir.join("history.db");
    config.tools.search_path = false;
    config
}

/// Engine that reports a 1000-byte transfer in quarters and writes the file
///
/// With `hold_at` set, each call stops after reporting that many bytes until
/// [`ScriptedEngine::release`] is called.
pub struct ScriptedEngine {
    hold_at: Option<u64>,
    fail_with: Option<String>,
    release: Semaphore,
    calls: AtomicUsize,
    templates: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            hold_at: None,
            fail_with: None,
            release: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            templates: Mutex::new(Vec::new()),
        }
    }

    pub fn holding_at(bytes: u64) -> Self {
        Self {
            hold_at: Some(bytes),
            ..Self::new()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn templates(&self) -> Vec<String> {
        self.templates.lock().unwrap().clone()
    }
}

fn output_file(template: &str, ext: &str) -> PathBuf {
    PathBuf::from(template.replace("%(ext)s", ext).replace("%%", "%"))
}

#[async_trait]
impl AcquisitionEngine for ScriptedEngine {
    async fn acquire(
        &self,
        request: &EngineRequest,
        hooks: &dyn EngineHooks,
    ) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.templates
            .lock()
            .unwrap()
            .push(request.output_template.clone());

        let fragment = output_file(&request.output_template, "mp4.part");
        tokio::fs::write(&fragment, b"part").await?;

        for bytes in [0, 250, 500, 750] {
            hooks
                .on_transfer(TransferUpdate::downloading(bytes, Some(1000)))
                .await?;
            if self.hold_at == Some(bytes) {
                if let Ok(permit) = self.release.acquire().await {
                    permit.forget();
                }
            }
        }

        if let Some(message) = &self.fail_with {
            return Err(EngineError::Failed(message.clone()));
        }

        hooks.on_transfer(TransferUpdate::finished(1000)).await?;
        let path = output_file(&request.output_template, "mp4");
        tokio::fs::write(&path, b"media").await?;
        Ok(EngineOutput {
            final_path: Some(path),
        })
    }

    async fn extract_audio(
        &self,
        _source: &Path,
        dest: &Path,
        _format: AudioFormat,
    ) -> Result<(), EngineError> {
        tokio::fs::write(dest, b"audio").await?;
        Ok(())
    }

    fn merge_tool_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Poll until `check` accepts the task (10 s timeout)
pub async fn wait_for(
    downloader: &MediaDownloader,
    id: &TaskId,
    check: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = downloader.get_task(id).await;
        if let Some(task) = task.as_ref().filter(|t| check(t)) {
            return task.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for task {id}: {task:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the task reaches `status`
pub async fn wait_for_status(downloader: &MediaDownloader, id: &TaskId, status: Status) -> Task {
    wait_for(downloader, id, |task| task.status == status).await
}

/// Write an executable shell script standing in for yt-dlp
#[cfg(unix)]
pub fn write_fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-yt-dlp");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}
