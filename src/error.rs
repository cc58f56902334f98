//! Error types for media-dl
//!
//! This module provides error handling for the library, including:
//! - The crate-wide [`Error`] type returned by registry, persistence and ledger operations
//! - [`EngineError`] returned by acquisition engines
//! - [`Interrupted`], the signal a checkpoint raises when a task is cancelled
//! - [`PlanError`] for engine option combinations that cannot be satisfied

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Caller supplied an unusable request (e.g. an empty URL)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Task not found in the registry
    #[error("task not found: {0}")]
    NotFound(String),

    /// Cannot perform operation in the task's current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task the operation targeted
        id: String,
        /// The operation that was attempted (e.g., "remove")
        operation: String,
        /// The state that prevents the operation
        current_state: String,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// History database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Acquisition engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Engine options could not be built for the task
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Raised from a checkpoint when the task's cancellation flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("download cancelled by user")]
pub struct Interrupted;

/// Errors reported by an [`AcquisitionEngine`](crate::engine::AcquisitionEngine)
#[derive(Debug, Error)]
pub enum EngineError {
    /// A checkpoint raised [`Interrupted`]; the engine stopped early
    #[error("download cancelled by user")]
    Interrupted,

    /// The engine ran and reported a transfer failure (message is surfaced to the user)
    #[error("{0}")]
    Failed(String),

    /// An external tool could not be located or started
    #[error("external tool error: {0}")]
    Tool(String),

    /// I/O error while driving the engine
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Interrupted> for EngineError {
    fn from(_: Interrupted) -> Self {
        EngineError::Interrupted
    }
}

/// Engine option combinations that cannot be satisfied with the available tools
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Audio extraction needs a transcoder (ffmpeg)
    #[error("ffmpeg is required to extract audio")]
    AudioToolRequired,

    /// Combining separate video and audio streams needs a merge tool (ffmpeg)
    #[error("ffmpeg is required to merge video and audio")]
    MergeToolRequired,

    /// No usable output location could be derived
    #[error("cannot derive an output path under {dir}: {reason}")]
    OutputPath {
        /// Target download directory
        dir: PathBuf,
        /// Why no path could be produced
        reason: String,
    },
}
