//! Per-task worker: one tokio task per attempt.
//!
//! Split into focused submodules:
//! - [`context`] - Shared worker state, pause/cancel checkpoints, engine hooks
//! - [`orchestration`] - Slot acquisition, output path, plan and engine call
//! - [`fallback`] - Recovery attempts after a classified engine failure
//! - [`finalization`] - Outcome handling, audio sidecar and cleanup

mod context;
mod fallback;
mod finalization;
mod orchestration;

pub(crate) use context::WorkerContext;
pub(crate) use orchestration::run_worker;
