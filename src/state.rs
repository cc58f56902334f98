//! Task registry snapshot file
//!
//! The file is a JSON array of task objects. Writing is atomic (temp file +
//! rename). Reading is lenient per entry: a damaged entry is skipped or
//! repaired with defaults, it never fails the whole load.

use crate::error::Result;
use crate::types::{Progress, Stage, Status, Task, TaskId};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Status a task is persisted (and restored) with
///
/// Tasks that were queued or running come back paused; nothing is restarted
/// implicitly.
pub fn persisted_status(status: Status) -> Status {
    match status {
        Status::Pending | Status::Downloading => Status::Paused,
        other => other,
    }
}

/// Copy of `task` as it should appear in the state file
pub fn snapshot(task: &Task) -> Task {
    let mut snapshot = task.clone();
    let status = persisted_status(task.status);
    if status != task.status {
        snapshot.status = status;
        snapshot.stage = Stage::Paused;
    }
    snapshot
}

/// Atomically replace the state file with `tasks`
pub async fn write_state(path: &Path, tasks: &[Task]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(tasks)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            debug!(path = ?tmp, error = %cleanup, "failed to remove temporary state file");
        }
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read the raw entries of the state file
///
/// A missing file yields no entries. A file that is not a JSON array is
/// logged and treated as empty.
pub async fn read_entries(path: &Path) -> Result<Vec<Value>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(_) => {
            warn!(path = ?path, "state file is not a JSON array, ignoring it");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "state file is not valid JSON, ignoring it");
            Ok(Vec::new())
        }
    }
}

/// Rebuild a task from one persisted entry
///
/// Returns `None` for entries that are not objects or have no URL. The id is
/// taken from the entry when present, otherwise `generate_id` is called.
/// Non-terminal statuses are restored as paused.
pub fn restore_task(entry: &Value, generate_id: impl FnOnce() -> TaskId) -> Option<Task> {
    let obj = entry.as_object()?;
    let url = string(obj, "url").filter(|u| !u.trim().is_empty())?;

    let id = string(obj, "id")
        .filter(|id| !id.trim().is_empty())
        .map(TaskId::from)
        .unwrap_or_else(generate_id);

    let status = persisted_status(
        string(obj, "status")
            .map(|s| Status::parse_lenient(&s))
            .unwrap_or(Status::Failed),
    );
    let stage = string(obj, "stage")
        .and_then(|s| Stage::parse(&s))
        .filter(|stage| stage.status() == status)
        .unwrap_or_else(|| Stage::resting(status));

    let progress = obj
        .get("progress")
        .and_then(Value::as_object)
        .map(restore_progress)
        .unwrap_or_default();

    Some(Task {
        id,
        url,
        title: string(obj, "title").unwrap_or_default(),
        thumbnail: string(obj, "thumbnail").unwrap_or_default(),
        format_id: string(obj, "format_id")
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| "best".to_string()),
        output_format: string(obj, "output_format")
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| "mp4".to_string()),
        include_audio: boolean(obj, "include_audio"),
        has_audio: boolean(obj, "has_audio"),
        has_video: boolean(obj, "has_video"),
        format_ext: string(obj, "format_ext").unwrap_or_default(),
        history_id: obj.get("history_id").and_then(integer),
        output_path: string(obj, "output_path").filter(|p| !p.is_empty()).map(PathBuf::from),
        audio_path: string(obj, "audio_path").filter(|p| !p.is_empty()).map(PathBuf::from),
        status,
        stage,
        progress,
        error_message: string(obj, "error_message").unwrap_or_default(),
        created_at: obj.get("created_at").and_then(timestamp).unwrap_or_else(Utc::now),
        completed_at: obj.get("completed_at").and_then(timestamp),
    })
}

fn restore_progress(obj: &Map<String, Value>) -> Progress {
    let number = |key: &str| obj.get(key).and_then(float).unwrap_or(0.0);
    Progress {
        downloaded_bytes: number("downloaded_bytes") as u64,
        total_bytes: number("total_bytes") as u64,
        speed: number("speed"),
        eta: obj.get("eta").and_then(float).map(|n| n as u64),
        percent: number("percent").clamp(0.0, 100.0),
        filename: string(obj, "filename").unwrap_or_default(),
    }
}

fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn boolean(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// Non-negative finite number, from a JSON number or a numeric string
fn float(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 string or unix seconds
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| float(value).and_then(from_unix)),
        Value::Number(_) => float(value).and_then(from_unix),
        _ => None,
    }
}

fn from_unix(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewTask;
    use serde_json::json;

    fn fixed_id() -> TaskId {
        TaskId::from("generated")
    }

    #[test]
    fn snapshot_coerces_running_tasks_to_paused() {
        let mut task = Task::new(TaskId::from("aaaa1111"), NewTask::new("https://a/b", "t"));
        task.transition(Stage::DownloadingVideo);

        let saved = snapshot(&task);
        assert_eq!(saved.status, Status::Paused);
        assert_eq!(saved.stage, Stage::Paused);

        task.transition(Stage::Completed);
        assert_eq!(snapshot(&task), task);
    }

    #[test]
    fn restore_full_entry() {
        let entry = json!({
            "id": "abcd0001",
            "url": "https://example.com/v",
            "title": "Clip",
            "format_id": "137",
            "output_format": "mp4",
            "include_audio": true,
            "has_audio": 1,
            "has_video": "true",
            "format_ext": "mp4",
            "history_id": 7,
            "output_path": "/dl/Clip.mp4",
            "status": "downloading",
            "stage": "merging",
            "progress": {"downloaded_bytes": 10, "total_bytes": 100, "percent": 10.0, "eta": 3},
            "created_at": "2024-05-01T10:00:00Z"
        });

        let task = restore_task(&entry, fixed_id).unwrap();
        assert_eq!(task.id, "abcd0001");
        assert_eq!(task.status, Status::Paused);
        assert_eq!(task.stage, Stage::Paused);
        assert!(task.include_audio && task.has_audio && task.has_video);
        assert_eq!(task.history_id, Some(7));
        assert_eq!(task.output_path, Some(PathBuf::from("/dl/Clip.mp4")));
        assert_eq!(task.progress.total_bytes, 100);
        assert_eq!(task.progress.eta, Some(3));
        assert_eq!(task.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn entry_without_url_is_skipped() {
        assert!(restore_task(&json!({"id": "x"}), fixed_id).is_none());
        assert!(restore_task(&json!({"url": "  "}), fixed_id).is_none());
        assert!(restore_task(&json!("not an object"), fixed_id).is_none());
    }

    #[test]
    fn missing_id_is_generated() {
        let task = restore_task(&json!({"url": "https://a/b", "status": "completed"}), fixed_id).unwrap();
        assert_eq!(task.id, "generated");
        assert_eq!(task.status, Status::Completed);
        assert_eq!(task.stage, Stage::Completed);
    }

    #[test]
    fn unparseable_numbers_default_to_zero() {
        let entry = json!({
            "url": "https://a/b",
            "status": "paused",
            "progress": {"downloaded_bytes": "lots", "total_bytes": null, "speed": "12.5", "percent": "NaN"}
        });
        let task = restore_task(&entry, fixed_id).unwrap();
        assert_eq!(task.progress.downloaded_bytes, 0);
        assert_eq!(task.progress.total_bytes, 0);
        assert_eq!(task.progress.speed, 12.5);
        assert_eq!(task.progress.percent, 0.0);
        assert_eq!(task.progress.eta, None);
    }

    #[test]
    fn unknown_status_restores_as_failed_and_bad_dates_as_now() {
        let before = Utc::now();
        let entry = json!({"url": "https://a/b", "status": "exploded", "created_at": "yesterday", "completed_at": 1714557600.5});
        let task = restore_task(&entry, fixed_id).unwrap();
        assert_eq!(task.status, Status::Failed);
        assert_eq!(task.stage, Stage::Failed);
        assert!(task.created_at >= before);
        assert_eq!(task.completed_at.unwrap().timestamp(), 1714557600);
    }

    #[test]
    fn inconsistent_stage_falls_back_to_status() {
        let entry = json!({"url": "https://a/b", "status": "completed", "stage": "merging"});
        let task = restore_task(&entry, fixed_id).unwrap();
        assert_eq!(task.stage, Stage::Completed);
    }

    #[tokio::test]
    async fn write_then_read_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("tasks.json");
        let task = Task::new(TaskId::from("abcd0002"), NewTask::new("https://a/b", "t"));

        write_state(&path, std::slice::from_ref(&task)).await.unwrap();
        assert!(!temp_path(&path).exists());

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], "abcd0002");
    }

    #[tokio::test]
    async fn missing_or_malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(&dir.path().join("absent.json")).await.unwrap().is_empty());

        let path = dir.path().join("object.json");
        tokio::fs::write(&path, br#"{"tasks": []}"#).await.unwrap();
        assert!(read_entries(&path).await.unwrap().is_empty());

        let path = dir.path().join("garbage.json");
        tokio::fs::write(&path, b"[{not json").await.unwrap();
        assert!(read_entries(&path).await.unwrap().is_empty());
    }
}
