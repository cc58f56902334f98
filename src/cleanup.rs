//! Best-effort removal of task artifacts
//!
//! Nothing here returns an error: a file that cannot be deleted is logged at
//! `warn` and skipped, so cleanup never changes a task's outcome.

use crate::types::TaskId;
use crate::utils::partial_fragments;
use std::path::Path;
use tracing::{debug, warn};

/// Delete leftover `.part`/`.ytdl` fragments sharing `output`'s base name
///
/// Returns the number of fragments removed.
pub(crate) async fn sweep_fragments(task_id: &TaskId, output: &Path) -> usize {
    let fragments = match tokio::task::spawn_blocking({
        let output = output.to_path_buf();
        move || partial_fragments(&output)
    })
    .await
    {
        Ok(fragments) => fragments,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "fragment scan panicked");
            return 0;
        }
    };

    let mut removed = 0;
    for fragment in fragments {
        if remove_file_logged(task_id, &fragment).await {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(task_id = %task_id, removed, ?output, "swept partial fragments");
    }
    removed
}

/// Delete `path` if it exists; returns true when a file was removed
pub(crate) async fn remove_file_logged(task_id: &TaskId, path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(task_id = %task_id, ?path, "removed file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(task_id = %task_id, ?path, error = %e, "failed to remove file");
            false
        }
    }
}

/// Remove a task's output, optional sidecar and all of the output's fragments
pub(crate) async fn remove_artifacts(task_id: &TaskId, output: Option<&Path>, sidecar: Option<&Path>) {
    if let Some(output) = output {
        remove_file_logged(task_id, output).await;
        sweep_fragments(task_id, output).await;
    }
    if let Some(sidecar) = sidecar {
        remove_file_logged(task_id, sidecar).await;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn remove_artifacts_deletes_output_sidecar_and_fragments() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip.mp4");
        let sidecar = dir.path().join("clip.audio.m4a");
        let fragment = dir.path().join("clip.f140.m4a.part");
        let keep = dir.path().join("other.mp4.part");
        for path in [&output, &sidecar, &fragment, &keep] {
            tokio::fs::write(path, b"data").await.unwrap();
        }

        let id = TaskId::from("aaaa0000");
        remove_artifacts(&id, Some(&output), Some(&sidecar)).await;

        assert!(!output.exists());
        assert!(!sidecar.exists());
        assert!(!fragment.exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn missing_files_are_not_an_error() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::from("aaaa0000");
        assert!(!remove_file_logged(&id, &dir.path().join("absent.mp4")).await);
        assert_eq!(sweep_fragments(&id, &dir.path().join("absent.mp4")).await, 0);
    }

    #[tokio::test]
    async fn sweep_keeps_the_finished_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip.mp4");
        tokio::fs::write(&output, b"done").await.unwrap();
        tokio::fs::write(dir.path().join("clip.ytdl"), b"state").await.unwrap();

        let removed = sweep_fragments(&TaskId::from("aaaa0000"), &output).await;
        assert_eq!(removed, 1);
        assert!(output.exists());
    }
}
