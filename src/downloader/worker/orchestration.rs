//! Worker orchestration: top-level lifecycle of one task attempt.

use std::path::{Path, PathBuf};

use crate::engine::options::effective_container;
use crate::engine::{DownloadPlan, EngineRequest, PlanInputs};
use crate::error::{EngineError, Error, Interrupted, Result};
use crate::progress::ProgressModel;
use crate::types::{Stage, Status, Task};
use crate::utils::{get_unique_path, has_previous_output, sanitize_filename};
use tracing::{debug, info};

use super::context::{CheckpointHooks, WorkerContext};
use super::fallback::recover;
use super::finalization::{Outcome, finalize};

/// Run one attempt of a task to its outcome
///
/// Phases:
/// 1. Pass the pause gate and wait for a concurrency slot (a cancelled task
///    leaves the queue at once)
/// 2. Mark the task downloading
/// 3. Resolve the output path and build the engine plan
/// 4. Run the engine, falling back once on a classified failure
/// 5. Finalize: completed, cancelled or failed
///
/// Every checkpoint re-passes the gate, so a worker parked by a pause gives its
/// slot back until resumed. Leaving the live-worker set is the very last step.
pub(crate) async fn run_worker(ctx: WorkerContext) {
    let outcome = execute(&ctx).await;

    finalize(&ctx, outcome).await;
    ctx.release_slot().await;
    ctx.deregister().await;
}

async fn execute(ctx: &WorkerContext) -> Outcome {
    let task = match begin(ctx).await {
        Ok(task) => task,
        Err(Interrupted) => {
            debug!(task_id = %ctx.id, "cancelled before the transfer started");
            return Outcome::Cancelled;
        }
    };
    info!(task_id = %ctx.id, url = %task.url, "worker started");
    ctx.downloader.record_start(&task).await;

    let engine = ctx.downloader.engine.clone();
    let merge_available = engine.merge_tool_available();

    let task = match prepare_output(ctx, merge_available).await {
        Ok(task) => task,
        Err(e) => return Outcome::Failed(e),
    };
    let Some(output_path) = task.output_path.clone() else {
        return Outcome::Failed(Error::Other("no output path".to_string()));
    };

    let plan = match DownloadPlan::build(&PlanInputs::from_task(&task, merge_available)) {
        Ok(plan) => plan,
        Err(e) => return Outcome::Failed(e.into()),
    };
    let request = build_request(ctx, &task, &output_path, plan);
    debug!(
        task_id = %ctx.id,
        selector = request.plan.selector(),
        template = %request.output_template,
        "invoking engine"
    );

    let hooks = CheckpointHooks::new(ctx, ProgressModel::for_plan(&request.plan), true);
    match engine.acquire(&request, &hooks).await {
        Ok(output) => Outcome::Completed(output),
        Err(EngineError::Interrupted) => Outcome::Cancelled,
        Err(EngineError::Failed(message)) => recover(ctx, &task, &request, message).await,
        Err(e) => Outcome::Failed(e.into()),
    }
}

/// Pass the pause gate, take a slot and move the task to `downloading`
///
/// Loops if the task was paused again between the checkpoint and the lock.
async fn begin(ctx: &WorkerContext) -> std::result::Result<Task, Interrupted> {
    loop {
        ctx.checkpoint().await?;

        let mut registry = ctx.downloader.registry.lock().await;
        let Some(task) = registry.tasks.get_mut(&ctx.id) else {
            return Err(Interrupted);
        };
        if task.status == Status::Paused {
            continue;
        }
        if !task.transition(Stage::Downloading) {
            return Err(Interrupted);
        }
        ctx.downloader.notifier.task_updated(task);
        return Ok(task.clone());
    }
}

/// Reuse the previous output path when something is left to continue from,
/// otherwise derive a fresh collision-free one
async fn prepare_output(ctx: &WorkerContext, merge_available: bool) -> Result<Task> {
    let task = ctx
        .snapshot()
        .await
        .ok_or_else(|| Error::NotFound(ctx.id.to_string()))?;

    if let Some(previous) = task.output_path.clone() {
        let probe = previous.clone();
        let reusable = tokio::task::spawn_blocking(move || has_previous_output(&probe))
            .await
            .unwrap_or(false);
        if reusable {
            debug!(task_id = %ctx.id, path = ?previous, "continuing previous output");
            return Ok(task);
        }
    }

    let config = &ctx.downloader.config;
    let dir = config.download_dir().clone();
    tokio::fs::create_dir_all(&dir).await?;

    let container = effective_container(&task, merge_available);
    if container != task.output_format {
        debug!(
            task_id = %ctx.id,
            requested = %task.output_format,
            native = %container,
            "no merge tool, keeping the native container"
        );
    }

    let candidate = dir.join(format!("{}.{}", sanitize_filename(&task.title), container));
    let collision = config.download.file_collision;
    let path = tokio::task::spawn_blocking(move || get_unique_path(&candidate, collision))
        .await
        .map_err(|e| Error::Other(format!("output path resolution panicked: {e}")))??;

    ctx.update(|task| {
        task.output_path = Some(path.clone());
        task.output_format = container.clone();
        true
    })
    .await
    .ok_or_else(|| Error::NotFound(ctx.id.to_string()))
}

fn build_request(
    ctx: &WorkerContext,
    task: &Task,
    output_path: &Path,
    plan: DownloadPlan,
) -> EngineRequest {
    let download = &ctx.downloader.config.download;
    EngineRequest {
        url: task.url.clone(),
        output_template: output_template(output_path),
        plan,
        cookies_from_browser: None,
        retries: download.retries,
        fragment_retries: download.fragment_retries,
        socket_timeout: download.socket_timeout,
        ffmpeg_location: ctx.downloader.config.tools.ffmpeg_path.clone(),
    }
}

/// `<dir>/<stem>.%(ext)s`, with literal `%` escaped for the engine
pub(super) fn output_template(output_path: &Path) -> String {
    let stem: PathBuf = output_path.with_extension("");
    format!("{}.%(ext)s", stem.to_string_lossy().replace('%', "%%"))
}
