//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Download behavior configuration (directories, concurrency, post-processing)
///
/// Groups settings related to how downloads are fetched, stored, and processed.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// File collision handling for freshly computed output paths
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Save an extra audio-only copy next to completed videos (default: true)
    #[serde(default = "default_true")]
    pub save_audio_on_complete: bool,

    /// Container of the extracted audio sidecar (default: m4a)
    #[serde(default)]
    pub audio_extract_format: AudioFormat,

    /// Engine-level retries for the whole transfer (default: 5)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Engine-level retries per fragment (default: 5)
    #[serde(default = "default_retries")]
    pub fragment_retries: u32,

    /// Socket timeout handed to the engine (default: 20 seconds)
    #[serde(default = "default_socket_timeout", with = "duration_serde")]
    pub socket_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            file_collision: FileCollisionAction::default(),
            save_audio_on_complete: true,
            audio_extract_format: AudioFormat::default(),
            retries: default_retries(),
            fragment_retries: default_retries(),
            socket_timeout: default_socket_timeout(),
        }
    }
}

/// External tool paths (yt-dlp, ffmpeg) and credential fallbacks
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Browsers whose cookies are tried, in order, after an HTTP 403
    #[serde(default = "default_cookie_browsers")]
    pub cookie_browsers: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            search_path: true,
            cookie_browsers: default_cookie_browsers(),
        }
    }
}

/// Data storage locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Task registry snapshot written by `save_state` (default: "media-dl-state.json")
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// SQLite history ledger (default: "media-dl-history.db")
    #[serde(default = "default_history_db_path")]
    pub history_db_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            history_db_path: default_history_db_path(),
        }
    }
}

/// Main configuration for MediaDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, concurrency, sidecar audio, engine retries
/// - [`tools`](ToolsConfig) - external binary paths, cookie browsers
/// - [`persistence`](PersistenceConfig) - state file and history database
///
/// All sub-config fields are flattened, so the JSON file is a single flat object.
/// Missing keys fall back to their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Data storage locations
    #[serde(flatten)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Load configuration from a JSON file, merged over defaults.
    ///
    /// A missing or unreadable file yields the default configuration; the
    /// failure is logged rather than returned.
    pub async fn load(path: &Path) -> Self {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Config>(&raw) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Write configuration to a JSON file (pretty-printed)
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Validate settings that have no sensible coercion
    pub fn validate(&self) -> Result<()> {
        if self.download.download_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "download directory must not be empty".to_string(),
                key: Some("download_dir".to_string()),
            });
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.download.max_concurrent_downloads = self.download.max_concurrent_downloads.max(1);
        self
    }
}

/// File collision handling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Fail the task, keep existing file
    Skip,
}

/// Audio container for extracted sidecars and audio-only downloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// AAC in an MP4 container (default)
    #[default]
    M4a,
    /// MPEG layer 3
    Mp3,
    /// Free Lossless Audio Codec
    Flac,
}

impl AudioFormat {
    /// Parse a container name; `None` for anything that is not an audio container
    pub fn from_container(container: &str) -> Option<Self> {
        match container.trim().to_ascii_lowercase().as_str() {
            "m4a" => Some(AudioFormat::M4a),
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }

    /// File extension / container name
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
        }
    }

    /// ffmpeg codec arguments producing this container
    pub fn ffmpeg_codec_args(&self) -> &'static [&'static str] {
        match self {
            AudioFormat::M4a => &["-acodec", "aac", "-b:a", "192k"],
            AudioFormat::Mp3 => &["-acodec", "libmp3lame", "-b:a", "192k"],
            AudioFormat::Flac => &["-acodec", "flac"],
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

// Unknown sidecar formats fall back to m4a instead of rejecting the whole config
impl<'de> Deserialize<'de> for AudioFormat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(AudioFormat::from_container(&raw).unwrap_or_default())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    5
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_cookie_browsers() -> Vec<String> {
    vec![
        "chrome".into(),
        "firefox".into(),
        "edge".into(),
        "safari".into(),
    ]
}

fn default_state_path() -> PathBuf {
    PathBuf::from("media-dl-state.json")
}

fn default_history_db_path() -> PathBuf {
    PathBuf::from("media-dl-history.db")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
