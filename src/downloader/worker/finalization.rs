//! Outcome handling: final status, audio sidecar, cleanup and ledger.

use std::path::{Path, PathBuf};

use crate::cleanup;
use crate::config::AudioFormat;
use crate::engine::EngineOutput;
use crate::error::Error;
use crate::types::{Stage, Task};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::context::WorkerContext;

/// How an attempt ended
pub(super) enum Outcome {
    /// The engine finished
    Completed(EngineOutput),
    /// A checkpoint raised the cancellation flag
    Cancelled,
    /// The engine reported a transfer failure (message surfaced verbatim)
    EngineFailed(String),
    /// Anything else: plan errors, tool or I/O failures
    Failed(Error),
}

pub(super) async fn finalize(ctx: &WorkerContext, outcome: Outcome) {
    match outcome {
        Outcome::Completed(output) => complete(ctx, output).await,
        Outcome::Cancelled => cancelled(ctx).await,
        Outcome::EngineFailed(message) => {
            warn!(task_id = %ctx.id, error = %message, "download failed");
            fail(ctx, message).await;
        }
        Outcome::Failed(e) => {
            error!(task_id = %ctx.id, error = %e, "download failed");
            fail(ctx, format!("download failed: {e}")).await;
        }
    }
}

async fn complete(ctx: &WorkerContext, output: EngineOutput) {
    // Cancelled after the last checkpoint
    if ctx.is_cancelled() {
        return cancelled(ctx).await;
    }
    let Some(task) = ctx.snapshot().await else {
        return;
    };

    let output_path = output.final_path.or_else(|| task.output_path.clone());
    let mut audio_path = None;
    if let Some(path) = &output_path {
        audio_path = extract_sidecar(ctx, &task, path).await;
        cleanup::sweep_fragments(&ctx.id, path).await;
    }

    let finished = ctx
        .update(|task| {
            if !task.transition(Stage::Completed) {
                return false;
            }
            task.output_path = output_path.clone();
            task.audio_path = audio_path.clone();
            task.progress.percent = 100.0;
            task.progress.speed = 0.0;
            task.progress.eta = None;
            task.error_message.clear();
            task.completed_at = Some(Utc::now());
            true
        })
        .await;

    match finished {
        Some(task) => {
            info!(task_id = %ctx.id, path = ?task.output_path, "download completed");
            ctx.downloader.notifier.record_finish(&task).await;
        }
        None => {
            if let Some(sidecar) = &audio_path {
                cleanup::remove_file_logged(&ctx.id, sidecar).await;
            }
            cancelled(ctx).await;
        }
    }
}

async fn cancelled(ctx: &WorkerContext) {
    let Some(task) = ctx
        .update(|task| {
            if !task.transition(Stage::Cancelled) {
                return false;
            }
            task.error_message.clear();
            task.progress.speed = 0.0;
            task.progress.eta = None;
            true
        })
        .await
    else {
        return;
    };

    cleanup::remove_artifacts(&ctx.id, task.output_path.as_deref(), task.audio_path.as_deref())
        .await;
    info!(task_id = %ctx.id, "download cancelled");
    ctx.downloader.notifier.record_finish(&task).await;
}

async fn fail(ctx: &WorkerContext, message: String) {
    let finished = ctx
        .update(|task| {
            if !task.transition(Stage::Failed) {
                return false;
            }
            task.error_message = message;
            task.progress.speed = 0.0;
            task.progress.eta = None;
            true
        })
        .await;

    match finished {
        Some(task) => ctx.downloader.notifier.record_finish(&task).await,
        // Cancelled concurrently
        None => cancelled(ctx).await,
    }
}

/// Write an audio-only copy next to a finished video when configured
///
/// Failures are logged; the task still completes without a sidecar.
async fn extract_sidecar(ctx: &WorkerContext, task: &Task, output: &Path) -> Option<PathBuf> {
    let config = &ctx.downloader.config.download;
    let carries_audio = task.has_audio || task.include_audio;
    if !config.save_audio_on_complete
        || !task.has_video
        || !carries_audio
        || task.wants_audio_container()
    {
        return None;
    }
    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        debug!(task_id = %ctx.id, path = ?output, "output missing, skipping audio sidecar");
        return None;
    }
    let engine = &ctx.downloader.engine;
    if !engine.merge_tool_available() {
        debug!(task_id = %ctx.id, "no transcoder, skipping audio sidecar");
        return None;
    }

    let format = config.audio_extract_format;
    let sidecar = sidecar_path(output, format);
    ctx.update(|task| task.transition(Stage::ExtractingAudio))
        .await?;

    match engine.extract_audio(output, &sidecar, format).await {
        Ok(()) => {
            debug!(task_id = %ctx.id, path = ?sidecar, "audio sidecar written");
            Some(sidecar)
        }
        Err(e) => {
            warn!(task_id = %ctx.id, error = %e, "audio sidecar extraction failed");
            cleanup::remove_file_logged(&ctx.id, &sidecar).await;
            None
        }
    }
}

/// `<stem>.audio.<ext>` next to `output`
pub(super) fn sidecar_path(output: &Path, format: AudioFormat) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    output.with_file_name(format!("{stem}.audio.{}", format.extension()))
}
