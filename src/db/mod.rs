//! SQLite history ledger for media-dl
//!
//! Keeps one row per task in `download_history`, written when a task starts
//! (or restarts) and when it reaches a final state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`history`] - Ledger writes and history queries

use crate::types::Status;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;

pub use history::normalize_platform;

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Unique database ID
    pub id: i64,
    /// Task identifier
    pub task_id: String,
    /// Source URL
    pub url: String,
    /// Title at the time of the last write
    pub title: Option<String>,
    /// Normalized platform name
    pub platform: Option<String>,
    /// Format selection
    pub format_id: Option<String>,
    /// Requested output container
    pub output_format: Option<String>,
    /// Native extension of the selected encoding
    pub format_ext: Option<String>,
    /// Final file size in bytes
    pub filesize_bytes: Option<i64>,
    /// Output path
    pub save_path: Option<String>,
    /// Unix timestamp of the first start
    pub started_at: Option<i64>,
    /// Unix timestamp of the final state
    pub finished_at: Option<i64>,
    /// Status name
    pub status: String,
    /// Failure message
    pub error_message: Option<String>,
    /// Whether an audio sidecar was written (0/1)
    pub audio_extracted: i32,
    /// include_audio flag (0/1)
    pub include_audio: i32,
    /// has_audio flag (0/1)
    pub has_audio: i32,
    /// has_video flag (0/1)
    pub has_video: i32,
}

/// A history entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Record id (stored on the task as `history_id`)
    pub id: i64,
    /// Task identifier
    pub task_id: String,
    /// Source URL
    pub url: String,
    /// Title
    pub title: String,
    /// Normalized platform (`youtube`, `x`, `bilibili` or the bare host)
    pub platform: String,
    /// Format selection
    pub format_id: String,
    /// Requested output container
    pub output_format: String,
    /// Native extension
    pub format_ext: String,
    /// Final file size in bytes
    pub filesize_bytes: Option<u64>,
    /// Output path
    pub save_path: Option<PathBuf>,
    /// When the task first started
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached its final state
    pub finished_at: Option<DateTime<Utc>>,
    /// Last recorded status
    pub status: Status,
    /// Failure message
    pub error_message: Option<String>,
    /// An audio sidecar was written
    pub audio_extracted: bool,
    /// include_audio flag
    pub include_audio: bool,
    /// has_audio flag
    pub has_audio: bool,
    /// has_video flag
    pub has_video: bool,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        let timestamp = |secs: Option<i64>| secs.and_then(|s| Utc.timestamp_opt(s, 0).single());

        HistoryEntry {
            id: row.id,
            task_id: row.task_id,
            url: row.url,
            title: row.title.unwrap_or_default(),
            platform: row.platform.unwrap_or_default(),
            format_id: row.format_id.unwrap_or_default(),
            output_format: row.output_format.unwrap_or_default(),
            format_ext: row.format_ext.unwrap_or_default(),
            filesize_bytes: row.filesize_bytes.map(|n| n.max(0) as u64),
            save_path: row.save_path.map(PathBuf::from),
            started_at: timestamp(row.started_at),
            finished_at: timestamp(row.finished_at),
            status: Status::parse_lenient(&row.status),
            error_message: row.error_message.filter(|m| !m.is_empty()),
            audio_extracted: row.audio_extracted != 0,
            include_audio: row.include_audio != 0,
            has_audio: row.has_audio != 0,
            has_video: row.has_video != 0,
        }
    }
}

/// Sort order for history queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistorySort {
    /// Most recently started first (default)
    #[default]
    Newest,
    /// Oldest first
    Oldest,
}

/// Filters for [`Database::query_history`]
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Only entries with this status
    pub status: Option<Status>,
    /// Only entries from this platform (normalized before matching)
    pub platform: Option<String>,
    /// Substring of title or URL
    pub keyword: Option<String>,
    /// Sort order
    pub sort: HistorySort,
    /// Page size
    pub limit: usize,
    /// Page offset
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            status: None,
            platform: None,
            keyword: None,
            sort: HistorySort::Newest,
            limit: 200,
            offset: 0,
        }
    }
}

/// Database handle for the history ledger
pub struct Database {
    pool: SqlitePool,
}
