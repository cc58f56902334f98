//! # media-dl
//!
//! Concurrent, pausable media download orchestrator.
//!
//! `media-dl` runs many long-running download jobs against a bounded worker
//! pool. Each job can be paused, resumed, cancelled and removed while it runs;
//! progress from multi-leg pipelines (separate video and audio transfers, a
//! merge, an audio transcode) is folded into one 0-100 figure; and the whole
//! registry can be saved to disk and restored after a restart.
//!
//! The crate does no metadata resolution. Callers hand it resolved identifiers
//! (URL, title, format id, stream flags) and an [`AcquisitionEngine`] that does
//! the actual transfer. [`YtDlpEngine`] drives the `yt-dlp` command line.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, MediaDownloader, NewTask};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.max_concurrent_downloads = 2;
//!
//!     // Discovers yt-dlp/ffmpeg, opens the history ledger, restores saved tasks
//!     let downloader = MediaDownloader::open(config).await?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut request = NewTask::new("https://www.youtube.com/watch?v=abc", "My video");
//!     request.format_id = Some("137+140".to_string());
//!     let id = downloader.create_task(request).await?;
//!     println!("queued {id}");
//!
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

mod cleanup;

/// Configuration types
pub mod config;
/// SQLite history ledger
pub mod db;
/// Task registry and worker pool
pub mod downloader;
/// Acquisition engine trait and the yt-dlp implementation
pub mod engine;
/// Error types
pub mod error;
/// Event fan-out and history ledger trait
pub mod notify;
/// Unified progress arithmetic
pub mod progress;
/// Fallback policy for failed acquisitions
pub mod retry;
/// Registry snapshot file
pub mod state;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{AudioFormat, Config, FileCollisionAction};
pub use db::Database;
pub use downloader::MediaDownloader;
pub use engine::{AcquisitionEngine, EngineHooks, EngineOutput, EngineRequest, YtDlpEngine};
pub use error::{EngineError, Error, Result};
pub use notify::HistoryLedger;
pub use types::{Event, NewTask, Progress, Stage, Status, Task, TaskId};
