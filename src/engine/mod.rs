//! Acquisition engine abstraction
//!
//! The downloader never talks to a transfer tool directly. It hands an
//! [`EngineRequest`] to an [`AcquisitionEngine`] together with a set of
//! [`EngineHooks`]; the engine calls the hooks for every progress report and
//! every post-processing phase, and stops as soon as a hook returns
//! [`Interrupted`].

use crate::config::AudioFormat;
use crate::error::{EngineError, Interrupted};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod options;
pub mod ytdlp;

pub use options::{DownloadPlan, PlanInputs};
pub use ytdlp::YtDlpEngine;

/// Everything an engine needs to fetch one task
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Source URL
    pub url: String,
    /// Output path with a `%(ext)s` placeholder for the final extension
    pub output_template: String,
    /// What to fetch and how to post-process it
    pub plan: DownloadPlan,
    /// Browser to borrow cookies from
    pub cookies_from_browser: Option<String>,
    /// Whole-transfer retries
    pub retries: u32,
    /// Per-fragment retries
    pub fragment_retries: u32,
    /// Socket timeout
    pub socket_timeout: Duration,
    /// Explicit ffmpeg location
    pub ffmpeg_location: Option<PathBuf>,
}

/// What a successful acquisition produced
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Final file after all post-processing, if the engine reported one
    pub final_path: Option<PathBuf>,
}

/// Transfer state carried by a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Bytes are flowing
    Downloading,
    /// The current file finished transferring
    Finished,
}

/// Byte-level progress of the file currently being transferred
#[derive(Debug, Clone)]
pub struct TransferUpdate {
    /// Downloading or finished
    pub status: TransferStatus,
    /// Bytes written so far
    pub downloaded_bytes: u64,
    /// Exact total, when known
    pub total_bytes: Option<u64>,
    /// Estimated total, used when the exact one is missing
    pub total_bytes_estimate: Option<u64>,
    /// Bytes per second
    pub speed: Option<f64>,
    /// Seconds remaining
    pub eta: Option<u64>,
    /// File being written
    pub filename: Option<String>,
    /// Video codec of the stream being transferred
    pub vcodec: Option<String>,
    /// Audio codec of the stream being transferred
    pub acodec: Option<String>,
}

impl TransferUpdate {
    /// A `downloading` report with no counters
    pub fn downloading(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: TransferStatus::Downloading,
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate: None,
            speed: None,
            eta: None,
            filename: None,
            vcodec: None,
            acodec: None,
        }
    }

    /// A `finished` report
    pub fn finished(total_bytes: u64) -> Self {
        Self {
            status: TransferStatus::Finished,
            ..Self::downloading(total_bytes, Some(total_bytes))
        }
    }

    /// Attach stream codecs
    pub fn with_codecs(mut self, vcodec: Option<&str>, acodec: Option<&str>) -> Self {
        self.vcodec = vcodec.map(str::to_string);
        self.acodec = acodec.map(str::to_string);
        self
    }

    /// Best known total, exact first
    pub fn total(&self) -> u64 {
        self.total_bytes
            .filter(|t| *t > 0)
            .or(self.total_bytes_estimate)
            .unwrap_or(0)
    }
}

/// Post-processing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Muxing separate streams
    Merge,
    /// Transcoding into an audio container
    ExtractAudio,
    /// Any other conversion (recode, remux, fixups)
    Convert,
}

/// Where a phase is
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseState {
    /// The phase began
    Started,
    /// Fraction of the phase done (0.0 to 1.0)
    Progress(f64),
    /// The phase is complete
    Finished,
}

/// Post-processing report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseUpdate {
    /// Which phase
    pub phase: Phase,
    /// How far along
    pub state: PhaseState,
}

impl PhaseUpdate {
    /// Convenience constructor
    pub fn new(phase: Phase, state: PhaseState) -> Self {
        Self { phase, state }
    }
}

/// Checkpoints the engine calls while it works
///
/// Each call may wait (while the task is paused) and returns [`Interrupted`]
/// once the task has been cancelled. Engines must stop promptly after an
/// `Interrupted` and return [`EngineError::Interrupted`].
#[async_trait]
pub trait EngineHooks: Send + Sync {
    /// Report transfer progress
    async fn on_transfer(&self, update: TransferUpdate) -> Result<(), Interrupted>;

    /// Report a post-processing phase change
    async fn on_phase(&self, update: PhaseUpdate) -> Result<(), Interrupted>;
}

/// A media acquisition / transcoding backend
///
/// # Examples
///
/// ```no_run
/// use media_dl::engine::{AcquisitionEngine, YtDlpEngine};
/// use media_dl::config::ToolsConfig;
///
/// let engine = YtDlpEngine::discover(&ToolsConfig::default())
///     .expect("yt-dlp binary not found");
/// println!("merge available: {}", engine.merge_tool_available());
/// ```
#[async_trait]
pub trait AcquisitionEngine: Send + Sync {
    /// Fetch `request.url`, reporting through `hooks`
    ///
    /// # Errors
    ///
    /// - [`EngineError::Interrupted`] after a hook returned [`Interrupted`]
    /// - [`EngineError::Failed`] when the transfer itself failed; the message
    ///   is shown to the user and drives fallback selection
    /// - [`EngineError::Tool`] / [`EngineError::Io`] when the engine could not run
    async fn acquire(
        &self,
        request: &EngineRequest,
        hooks: &dyn EngineHooks,
    ) -> Result<EngineOutput, EngineError>;

    /// Write an audio-only copy of `source` to `dest`
    async fn extract_audio(
        &self,
        source: &Path,
        dest: &Path,
        format: AudioFormat,
    ) -> Result<(), EngineError>;

    /// Whether streams can be merged or transcoded (ffmpeg present)
    fn merge_tool_available(&self) -> bool;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
