//! Recovery after a classified engine failure.

use crate::engine::EngineRequest;
use crate::error::EngineError;
use crate::progress::ProgressModel;
use crate::retry::{FailureClass, Fallback, run_fallback};
use crate::types::Task;
use tracing::{info, warn};

use super::context::{CheckpointHooks, WorkerContext};
use super::finalization::Outcome;

/// Try the fallback chosen for `message`, if any
///
/// A failed fallback surfaces the original message. A relaxed-format attempt
/// shows its selector in `format_id` while it runs and restores the original
/// selection unless it succeeds.
pub(super) async fn recover(
    ctx: &WorkerContext,
    task: &Task,
    request: &EngineRequest,
    message: String,
) -> Outcome {
    let class = FailureClass::classify(&message);
    let engine = ctx.downloader.engine.clone();
    let browsers = &ctx.downloader.config.tools.cookie_browsers;

    let Some(fallback) = Fallback::plan(class, task, engine.merge_tool_available(), browsers)
    else {
        return Outcome::EngineFailed(message);
    };
    info!(task_id = %ctx.id, ?class, error = %message, "engine failed, trying fallback");

    let original_format = task.format_id.clone();
    if let Fallback::RelaxedFormat { plan } = &fallback {
        let selector = plan.selector().to_string();
        ctx.update(|task| {
            task.format_id = selector;
            true
        })
        .await;
    }

    let result = run_fallback(&fallback, |overrides| {
        let mut attempt = request.clone();
        if let Some(plan) = overrides.plan {
            attempt.plan = plan;
        }
        attempt.cookies_from_browser = overrides.cookies_from_browser;
        let engine = engine.clone();
        async move {
            let hooks = CheckpointHooks::new(ctx, ProgressModel::for_plan(&attempt.plan), false);
            engine.acquire(&attempt, &hooks).await
        }
    })
    .await;

    if result.is_err() && matches!(fallback, Fallback::RelaxedFormat { .. }) {
        ctx.update(|task| {
            task.format_id = original_format;
            true
        })
        .await;
    }

    match result {
        Ok(output) => Outcome::Completed(output),
        Err(EngineError::Interrupted) => Outcome::Cancelled,
        Err(e) => {
            warn!(task_id = %ctx.id, error = %e, "fallback failed");
            Outcome::EngineFailed(message)
        }
    }
}
