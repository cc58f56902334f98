//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a task
///
/// Eight lowercase hex digits taken from a random v4 UUID. Ids are compared as
/// plain strings so that ids read back from an older state file keep working
/// even if they do not follow the current format.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random id
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(uuid[..8].to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for TaskId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created, waiting for a worker slot
    Pending,
    /// A worker is transferring or post-processing
    Downloading,
    /// Paused by user (or restored from a state file)
    Paused,
    /// Finished successfully
    Completed,
    /// Failed with an error message
    Failed,
    /// Cancelled by user
    Cancelled,
}

impl Status {
    /// Parse a persisted status name
    ///
    /// Unknown names map to [`Status::Failed`].
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Status::Pending,
            "downloading" => Status::Downloading,
            "paused" => Status::Paused,
            "completed" => Status::Completed,
            "failed" => Status::Failed,
            "cancelled" => Status::Cancelled,
            _ => Status::Failed,
        }
    }

    /// Whether the task has reached a final status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Lowercase name used in events, the state file and the history ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for a worker slot
    Pending,
    /// Transferring a single (or unclassified) stream
    Downloading,
    /// Transferring the video sub-stream of a split download
    DownloadingVideo,
    /// Transferring the audio sub-stream of a split download
    DownloadingAudio,
    /// Muxing separate streams into one container
    Merging,
    /// Transcoding the download into an audio container
    ExtractingAudio,
    /// Other post-processing (remux, recode, moving files)
    Processing,
    /// Paused
    Paused,
    /// Finished successfully
    Completed,
    /// Failed
    Failed,
    /// Cancelled
    Cancelled,
}

impl Stage {
    /// Parse a persisted stage name; `None` when unrecognized
    pub fn parse(raw: &str) -> Option<Self> {
        let stage = match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Stage::Pending,
            "downloading" => Stage::Downloading,
            "downloading_video" => Stage::DownloadingVideo,
            "downloading_audio" => Stage::DownloadingAudio,
            "merging" => Stage::Merging,
            "extracting_audio" => Stage::ExtractingAudio,
            "processing" => Stage::Processing,
            "paused" => Stage::Paused,
            "completed" => Stage::Completed,
            "failed" => Stage::Failed,
            "cancelled" => Stage::Cancelled,
            _ => return None,
        };
        Some(stage)
    }

    /// Stages during which a worker is actively running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Stage::Downloading
                | Stage::DownloadingVideo
                | Stage::DownloadingAudio
                | Stage::Merging
                | Stage::ExtractingAudio
                | Stage::Processing
        )
    }

    /// The status this stage implies
    pub fn status(&self) -> Status {
        match self {
            Stage::Pending => Status::Pending,
            Stage::Paused => Status::Paused,
            Stage::Completed => Status::Completed,
            Stage::Failed => Status::Failed,
            Stage::Cancelled => Status::Cancelled,
            _ => Status::Downloading,
        }
    }

    /// The stage a task sits in when it only carries `status`
    pub fn resting(status: Status) -> Self {
        match status {
            Status::Pending => Stage::Pending,
            Status::Downloading => Stage::Downloading,
            Status::Paused => Stage::Paused,
            Status::Completed => Stage::Completed,
            Status::Failed => Stage::Failed,
            Status::Cancelled => Stage::Cancelled,
        }
    }

    /// Allowed-transition table
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Stage::Pending => next.is_active() || matches!(next, Stage::Cancelled | Stage::Failed),
            s if s.is_active() => {
                next.is_active()
                    || matches!(
                        next,
                        Stage::Paused | Stage::Completed | Stage::Failed | Stage::Cancelled
                    )
            }
            Stage::Paused => matches!(
                next,
                Stage::Downloading | Stage::Completed | Stage::Failed | Stage::Cancelled
            ),
            Stage::Failed => next == Stage::Cancelled,
            _ => false,
        }
    }

    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Downloading => "downloading",
            Stage::DownloadingVideo => "downloading_video",
            Stage::DownloadingAudio => "downloading_audio",
            Stage::Merging => "merging",
            Stage::ExtractingAudio => "extracting_audio",
            Stage::Processing => "processing",
            Stage::Paused => "paused",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer counters of a task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    /// Bytes written so far
    pub downloaded_bytes: u64,
    /// Total bytes (0 if unknown)
    pub total_bytes: u64,
    /// Transfer speed in bytes per second
    pub speed: f64,
    /// Estimated seconds remaining, unknown until the engine reports one
    pub eta: Option<u64>,
    /// Overall progress percentage (0.0 to 100.0)
    pub percent: f64,
    /// Last file the engine reported writing
    pub filename: String,
}

/// A download task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Source URL
    pub url: String,
    /// Display title, also the basis of the output filename
    pub title: String,
    /// Thumbnail URL for listeners
    pub thumbnail: String,
    /// Selected encoding (format selector)
    pub format_id: String,
    /// Requested output container (mp4, webm, mkv, mp3, m4a, flac, ...)
    pub output_format: String,
    /// Whether the result should carry audio
    pub include_audio: bool,
    /// The selected encoding carries an audio stream
    pub has_audio: bool,
    /// The selected encoding carries a video stream
    pub has_video: bool,
    /// Native extension of the selected encoding
    pub format_ext: String,
    /// History ledger row, assigned once by the ledger
    pub history_id: Option<i64>,
    /// Output file
    pub output_path: Option<PathBuf>,
    /// Extracted audio sidecar
    pub audio_path: Option<PathBuf>,
    /// Coarse status
    pub status: Status,
    /// Pipeline stage
    pub stage: Stage,
    /// Transfer counters and percent
    pub progress: Progress,
    /// Failure message (empty unless failed)
    pub error_message: String,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task completed successfully
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a pending task from a creation request
    pub fn new(id: TaskId, request: NewTask) -> Self {
        let format_id = request
            .format_id
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| "best".to_string());
        let output_format = if request.output_format.trim().is_empty() {
            "mp4".to_string()
        } else {
            request.output_format.trim().to_ascii_lowercase()
        };

        Self {
            id,
            url: request.url.trim().to_string(),
            title: request.title,
            thumbnail: request.thumbnail,
            format_id,
            output_format,
            include_audio: request.include_audio,
            has_audio: request.has_audio,
            has_video: request.has_video,
            format_ext: request.format_ext,
            history_id: None,
            output_path: None,
            audio_path: None,
            status: Status::Pending,
            stage: Stage::Pending,
            progress: Progress::default(),
            error_message: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `stage` (and the status it implies) if the transition table allows it
    ///
    /// Returns false and leaves the task untouched otherwise.
    pub fn transition(&mut self, stage: Stage) -> bool {
        if !self.stage.can_transition_to(stage) {
            return false;
        }
        self.stage = stage;
        self.status = stage.status();
        true
    }

    /// Whether the requested container is audio-only
    pub fn wants_audio_container(&self) -> bool {
        crate::config::AudioFormat::from_container(&self.output_format).is_some()
    }
}

/// Request to create a task
///
/// Metadata is resolved by the caller; the downloader never probes the URL.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTask {
    /// Source URL (required)
    pub url: String,
    /// Display title
    pub title: String,
    /// Thumbnail URL
    pub thumbnail: String,
    /// Selected encoding; `None` means "best"
    pub format_id: Option<String>,
    /// Requested output container (defaults to mp4 when empty)
    pub output_format: String,
    /// Whether the result should carry audio
    pub include_audio: bool,
    /// The selected encoding carries an audio stream
    pub has_audio: bool,
    /// The selected encoding carries a video stream
    pub has_video: bool,
    /// Native extension of the selected encoding
    pub format_ext: String,
}

impl NewTask {
    /// Request for `url` with a title, best format, mp4 output and audio included
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            output_format: "mp4".to_string(),
            include_audio: true,
            has_audio: true,
            has_video: true,
            format_ext: "mp4".to_string(),
            ..Default::default()
        }
    }
}

/// Events emitted to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created or changed
    TaskUpdated {
        /// Snapshot of the task after the change
        task: Box<Task>,
    },

    /// A task was removed from the registry
    TaskRemoved {
        /// Task ID
        id: TaskId,
    },
}

impl Event {
    /// Id of the task the event concerns
    pub fn task_id(&self) -> &TaskId {
        match self {
            Event::TaskUpdated { task } => &task.id,
            Event::TaskRemoved { id } => id,
        }
    }
}
