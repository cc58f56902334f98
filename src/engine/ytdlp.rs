//! `yt-dlp` command-line engine
//!
//! Progress is read from machine-readable template lines, one report per line,
//! on either output stream. Each report is awaited through the hooks before the
//! next line is read, so a paused task stops draining the pipes and the child
//! blocks on its own output.

use super::{
    AcquisitionEngine, EngineHooks, EngineOutput, EngineRequest, Phase, PhaseState, PhaseUpdate,
    TransferStatus, TransferUpdate,
};
use crate::config::{AudioFormat, ToolsConfig};
use crate::engine::DownloadPlan;
use crate::error::EngineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

const TRANSFER_MARKER: &str = "[mdl] ";
const PHASE_MARKER: &str = "[mdl-pp] ";
const FILE_MARKER: &str = "[mdl-file] ";

const TRANSFER_TEMPLATE: &str = "download:[mdl] %(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s|%(info.vcodec)s|%(info.acodec)s|%(progress.filename)s";
const PHASE_TEMPLATE: &str = "postprocess:[mdl-pp] %(progress.status)s|%(progress.postprocessor)s";
const FILE_TEMPLATE: &str = "after_move:[mdl-file] %(filepath)s";

/// One parsed output line
#[derive(Debug, Clone)]
enum OutputLine {
    Transfer(TransferUpdate),
    Phase(PhaseUpdate),
    FinalPath(PathBuf),
}

/// Engine driving the `yt-dlp` binary, with `ffmpeg` for merging and audio
///
/// # Examples
///
/// ```no_run
/// use media_dl::engine::YtDlpEngine;
/// use std::path::PathBuf;
///
/// // Explicit paths
/// let engine = YtDlpEngine::new(PathBuf::from("/usr/bin/yt-dlp"), Some(PathBuf::from("/usr/bin/ffmpeg")));
///
/// // Or discover from PATH
/// let engine = YtDlpEngine::discover(&Default::default()).expect("yt-dlp not found");
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    ytdlp: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl YtDlpEngine {
    /// Create an engine with explicit binary paths
    pub fn new(ytdlp: PathBuf, ffmpeg: Option<PathBuf>) -> Self {
        Self { ytdlp, ffmpeg }
    }

    /// Locate the binaries from config, falling back to PATH when allowed
    ///
    /// # Errors
    ///
    /// [`EngineError::Tool`] when no yt-dlp binary can be found. A missing
    /// ffmpeg is not an error; merging and audio extraction are then
    /// unavailable.
    pub fn discover(tools: &ToolsConfig) -> Result<Self, EngineError> {
        let ytdlp = locate(tools.ytdlp_path.as_ref(), "yt-dlp", tools.search_path)
            .ok_or_else(|| EngineError::Tool("yt-dlp binary not found".to_string()))?;
        let ffmpeg = locate(tools.ffmpeg_path.as_ref(), "ffmpeg", tools.search_path);
        if ffmpeg.is_none() {
            warn!("ffmpeg not found; merging and audio extraction are disabled");
        }
        Ok(Self::new(ytdlp, ffmpeg))
    }

    /// Path of the ffmpeg binary in use
    pub fn ffmpeg_path(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    /// Command-line arguments for `request`
    pub fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "--newline",
            "--progress",
            "--continue",
            "--no-playlist",
            "--progress-template",
            TRANSFER_TEMPLATE,
            "--progress-template",
            PHASE_TEMPLATE,
            "--print",
            FILE_TEMPLATE,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend([
            "--retries".to_string(),
            request.retries.to_string(),
            "--fragment-retries".to_string(),
            request.fragment_retries.to_string(),
            "--socket-timeout".to_string(),
            request.socket_timeout.as_secs().max(1).to_string(),
            "-f".to_string(),
            request.plan.selector().to_string(),
        ]);

        if let DownloadPlan::ExtractAudio { codec, quality } = &request.plan {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                codec.extension().to_string(),
            ]);
            if let Some(quality) = quality {
                args.extend(["--audio-quality".to_string(), format!("{quality}K")]);
            }
        }
        if let Some(container) = request.plan.merge_into() {
            args.extend(["--merge-output-format".to_string(), container.to_string()]);
        }
        if request.plan.recode_mp4() {
            args.extend(["--recode-video".to_string(), "mp4".to_string()]);
        }
        if let Some(browser) = &request.cookies_from_browser {
            args.extend(["--cookies-from-browser".to_string(), browser.clone()]);
        }
        if let Some(ffmpeg) = request.ffmpeg_location.as_ref().or(self.ffmpeg.as_ref()) {
            args.extend([
                "--ffmpeg-location".to_string(),
                ffmpeg.to_string_lossy().into_owned(),
            ]);
        }

        args.extend([
            "-o".to_string(),
            request.output_template.clone(),
            "--".to_string(),
            request.url.clone(),
        ]);
        args
    }
}

#[async_trait]
impl AcquisitionEngine for YtDlpEngine {
    async fn acquire(
        &self,
        request: &EngineRequest,
        hooks: &dyn EngineHooks,
    ) -> Result<EngineOutput, EngineError> {
        let args = self.build_args(request);
        debug!(binary = ?self.ytdlp, ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.ytdlp)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Tool(format!("failed to start yt-dlp: {e}")))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(EngineError::Tool("yt-dlp output unavailable".to_string()));
        };

        let drained = match drain(stdout, stderr, hooks).await {
            Ok(drained) => drained,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "yt-dlp already exited");
                }
                return Err(e);
            }
        };

        let status = child.wait().await?;
        if status.success() {
            Ok(EngineOutput {
                final_path: drained.final_path,
            })
        } else {
            let message = drained
                .error_line
                .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            Err(EngineError::Failed(message))
        }
    }

    async fn extract_audio(
        &self,
        source: &Path,
        dest: &Path,
        format: AudioFormat,
    ) -> Result<(), EngineError> {
        let ffmpeg = self
            .ffmpeg
            .as_ref()
            .ok_or_else(|| EngineError::Tool("ffmpeg binary not found".to_string()))?;

        let output = Command::new(ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-vn")
            .args(format.ffmpeg_codec_args())
            .arg(dest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Tool(format!("failed to start ffmpeg: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("ffmpeg failed")
            .trim()
            .to_string();
        Err(EngineError::Failed(message))
    }

    fn merge_tool_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn locate(explicit: Option<&PathBuf>, binary: &str, search_path: bool) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.clone());
        }
        warn!(path = ?path, binary, "configured binary does not exist");
    }
    if search_path {
        return which::which(binary).ok();
    }
    None
}

/// What the child reported once both pipes closed
#[derive(Debug, Default)]
struct Drained {
    final_path: Option<PathBuf>,
    error_line: Option<String>,
}

/// Last `ERROR:` line seen on stderr, or else the last non-empty one
#[derive(Debug, Default)]
struct ErrorTail {
    last_error: Option<String>,
    last_line: Option<String>,
}

impl ErrorTail {
    fn push(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed.starts_with("ERROR:") {
            self.last_error = Some(trimmed.to_string());
        } else if trimmed.starts_with("WARNING:") {
            debug!(line = %trimmed, "yt-dlp");
        }
        self.last_line = Some(trimmed.to_string());
    }

    fn into_message(self) -> Option<String> {
        self.last_error.or(self.last_line)
    }
}

/// Read both output streams until they close
///
/// Marker lines count on either stream; other stderr lines feed the error
/// message. Lines are decoded lossily, so bytes that are not UTF-8 never end
/// the read early.
async fn drain<O, E>(stdout: O, stderr: E, hooks: &dyn EngineHooks) -> Result<Drained, EngineError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = BufReader::new(stdout).split(b'\n');
    let mut err = BufReader::new(stderr).split(b'\n');
    let (mut out_open, mut err_open) = (true, true);
    let mut drained = Drained::default();
    let mut tail = ErrorTail::default();

    while out_open || err_open {
        let (from_stderr, segment) = tokio::select! {
            segment = out.next_segment(), if out_open => (false, segment?),
            segment = err.next_segment(), if err_open => {
                let segment = segment.unwrap_or_else(|e| {
                    debug!(error = %e, "yt-dlp stderr unreadable");
                    None
                });
                (true, segment)
            }
        };
        let Some(bytes) = segment else {
            if from_stderr {
                err_open = false;
            } else {
                out_open = false;
            }
            continue;
        };

        let line = String::from_utf8_lossy(&bytes);
        match parse_line(&line) {
            Some(OutputLine::Transfer(update)) => hooks.on_transfer(update).await?,
            Some(OutputLine::Phase(update)) => hooks.on_phase(update).await?,
            Some(OutputLine::FinalPath(path)) => drained.final_path = Some(path),
            None if from_stderr => tail.push(&line),
            None => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!(line = %trimmed, "yt-dlp");
                }
            }
        }
    }

    drained.error_line = tail.into_message();
    Ok(drained)
}

fn parse_line(line: &str) -> Option<OutputLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix(TRANSFER_MARKER) {
        return parse_transfer(rest).map(OutputLine::Transfer);
    }
    if let Some(rest) = line.strip_prefix(PHASE_MARKER) {
        return parse_phase(rest).map(OutputLine::Phase);
    }
    if let Some(rest) = line.strip_prefix(FILE_MARKER) {
        let path = rest.trim();
        return (!path.is_empty()).then(|| OutputLine::FinalPath(PathBuf::from(path)));
    }
    None
}

fn parse_transfer(rest: &str) -> Option<TransferUpdate> {
    let fields: Vec<&str> = rest.splitn(9, '|').collect();
    if fields.len() != 9 {
        return None;
    }

    let status = match fields[0] {
        "downloading" => TransferStatus::Downloading,
        "finished" => TransferStatus::Finished,
        _ => return None,
    };

    Some(TransferUpdate {
        status,
        downloaded_bytes: number(fields[1]).map(|n| n as u64).unwrap_or(0),
        total_bytes: number(fields[2]).map(|n| n as u64),
        total_bytes_estimate: number(fields[3]).map(|n| n as u64),
        speed: number(fields[4]),
        eta: number(fields[5]).map(|n| n as u64),
        vcodec: text(fields[6]),
        acodec: text(fields[7]),
        filename: text(fields[8]),
    })
}

fn parse_phase(rest: &str) -> Option<PhaseUpdate> {
    let (status, processor) = rest.split_once('|')?;
    let state = match status {
        "started" => PhaseState::Started,
        "processing" => PhaseState::Progress(0.0),
        "finished" => PhaseState::Finished,
        _ => return None,
    };
    let phase = if processor.contains("Merger") {
        Phase::Merge
    } else if processor.contains("ExtractAudio") {
        Phase::ExtractAudio
    } else {
        Phase::Convert
    };
    Some(PhaseUpdate::new(phase, state))
}

fn number(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == "NA" || field == "None" {
        return None;
    }
    field.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

fn text(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty() && field != "NA").then(|| field.to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Interrupted;
    use std::sync::Mutex;
    use std::time::Duration;

    fn request(plan: DownloadPlan) -> EngineRequest {
        EngineRequest {
            url: "https://example.com/watch?v=1".to_string(),
            output_template: "/dl/clip.%(ext)s".to_string(),
            plan,
            cookies_from_browser: None,
            retries: 5,
            fragment_retries: 5,
            socket_timeout: Duration::from_secs(20),
            ffmpeg_location: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn args_for_extract_audio() {
        let engine = YtDlpEngine::new("yt-dlp".into(), Some("/opt/ffmpeg".into()));
        let args = engine.build_args(&request(DownloadPlan::ExtractAudio {
            codec: AudioFormat::Mp3,
            quality: Some(320),
        }));

        assert_eq!(value_after(&args, "-f"), Some("bestaudio/best"));
        assert!(args.contains(&"-x".to_string()));
        assert_eq!(value_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality"), Some("320K"));
        assert_eq!(value_after(&args, "--ffmpeg-location"), Some("/opt/ffmpeg"));
        assert_eq!(value_after(&args, "--socket-timeout"), Some("20"));
        assert!(args.contains(&"--continue".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/watch?v=1"));
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn args_for_merge_with_cookies() {
        let engine = YtDlpEngine::new("yt-dlp".into(), None);
        let mut req = request(DownloadPlan::MergeStreams {
            selector: "137+bestaudio/best".into(),
            merge_into: Some("mp4".into()),
            recode_mp4: true,
        });
        req.cookies_from_browser = Some("firefox".into());
        let args = engine.build_args(&req);

        assert_eq!(value_after(&args, "-f"), Some("137+bestaudio/best"));
        assert_eq!(value_after(&args, "--merge-output-format"), Some("mp4"));
        assert_eq!(value_after(&args, "--recode-video"), Some("mp4"));
        assert_eq!(value_after(&args, "--cookies-from-browser"), Some("firefox"));
        assert_eq!(value_after(&args, "-o"), Some("/dl/clip.%(ext)s"));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        assert!(!args.contains(&"-x".to_string()));
    }

    #[test]
    fn parse_transfer_line() {
        let line = "[mdl] downloading|1024|4096|NA|512.5|6|avc1.640028|none|/dl/clip.f137.mp4.part";
        let Some(OutputLine::Transfer(update)) = parse_line(line) else {
            panic!("expected transfer line");
        };
        assert_eq!(update.status, TransferStatus::Downloading);
        assert_eq!(update.downloaded_bytes, 1024);
        assert_eq!(update.total_bytes, Some(4096));
        assert_eq!(update.total_bytes_estimate, None);
        assert_eq!(update.speed, Some(512.5));
        assert_eq!(update.eta, Some(6));
        assert_eq!(update.vcodec.as_deref(), Some("avc1.640028"));
        assert_eq!(update.acodec.as_deref(), Some("none"));
        assert_eq!(update.filename.as_deref(), Some("/dl/clip.f137.mp4.part"));
    }

    #[test]
    fn parse_transfer_line_keeps_pipes_in_filename() {
        let line = "[mdl] finished|10|NA|12.0|NA|NA|NA|NA|/dl/a|b.mp4";
        let Some(OutputLine::Transfer(update)) = parse_line(line) else {
            panic!("expected transfer line");
        };
        assert_eq!(update.status, TransferStatus::Finished);
        assert_eq!(update.total(), 12);
        assert_eq!(update.filename.as_deref(), Some("/dl/a|b.mp4"));
    }

    #[test]
    fn parse_phase_lines() {
        let Some(OutputLine::Phase(update)) = parse_line("[mdl-pp] started|Merger") else {
            panic!("expected phase line");
        };
        assert_eq!(update, PhaseUpdate::new(Phase::Merge, PhaseState::Started));

        let Some(OutputLine::Phase(update)) = parse_line("[mdl-pp] finished|ExtractAudio") else {
            panic!("expected phase line");
        };
        assert_eq!(update, PhaseUpdate::new(Phase::ExtractAudio, PhaseState::Finished));

        let Some(OutputLine::Phase(update)) = parse_line("[mdl-pp] started|MoveFiles") else {
            panic!("expected phase line");
        };
        assert_eq!(update.phase, Phase::Convert);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert!(parse_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_line("[mdl] bogus|1|2|3|4|5|6|7|8").is_none());
        assert!(parse_line("[mdl] downloading|1|2").is_none());
        assert!(matches!(
            parse_line("[mdl-file] /dl/clip.mp4"),
            Some(OutputLine::FinalPath(p)) if p == Path::new("/dl/clip.mp4")
        ));
    }

    #[test]
    fn discover_fails_without_binary() {
        let tools = ToolsConfig {
            ytdlp_path: Some("/nonexistent/yt-dlp-xyz".into()),
            ffmpeg_path: None,
            search_path: false,
            cookie_browsers: Vec::new(),
        };
        assert!(matches!(YtDlpEngine::discover(&tools), Err(EngineError::Tool(_))));
    }

    #[derive(Default)]
    struct RecordingHooks {
        transfers: Mutex<Vec<TransferUpdate>>,
        phases: Mutex<Vec<PhaseUpdate>>,
        interrupt: bool,
    }

    #[async_trait]
    impl EngineHooks for RecordingHooks {
        async fn on_transfer(&self, update: TransferUpdate) -> Result<(), Interrupted> {
            self.transfers.lock().unwrap().push(update);
            if self.interrupt { Err(Interrupted) } else { Ok(()) }
        }

        async fn on_phase(&self, update: PhaseUpdate) -> Result<(), Interrupted> {
            self.phases.lock().unwrap().push(update);
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_prefers_error_lines() {
        let stderr: &[u8] =
            b"WARNING: something\nERROR: [youtube] x: Video unavailable\ntrailing noise\n";
        let drained = drain(&b""[..], stderr, &RecordingHooks::default())
            .await
            .unwrap();
        assert_eq!(
            drained.error_line.as_deref(),
            Some("ERROR: [youtube] x: Video unavailable")
        );

        let stderr: &[u8] = b"only this\n\n";
        let drained = drain(&b""[..], stderr, &RecordingHooks::default())
            .await
            .unwrap();
        assert_eq!(drained.error_line.as_deref(), Some("only this"));
    }

    #[tokio::test]
    async fn drain_honors_markers_on_stderr() {
        let stdout: &[u8] = b"[mdl] downloading|10|100|NA|NA|NA|NA|NA|/dl/clip.part\n";
        let stderr: &[u8] = b"[mdl-pp] started|Merger\n\
            [mdl-pp] finished|Merger\n\
            [mdl-file] /dl/clip.mp4\n\
            ERROR: postprocessing: Conversion failed!\n";
        let hooks = RecordingHooks::default();

        let drained = drain(stdout, stderr, &hooks).await.unwrap();

        assert_eq!(hooks.transfers.lock().unwrap().len(), 1);
        assert_eq!(
            *hooks.phases.lock().unwrap(),
            vec![
                PhaseUpdate::new(Phase::Merge, PhaseState::Started),
                PhaseUpdate::new(Phase::Merge, PhaseState::Finished),
            ]
        );
        assert_eq!(drained.final_path, Some(PathBuf::from("/dl/clip.mp4")));
        assert_eq!(
            drained.error_line.as_deref(),
            Some("ERROR: postprocessing: Conversion failed!")
        );
    }

    #[tokio::test]
    async fn drain_reads_past_invalid_utf8() {
        let stdout: &[u8] = b"[youtube] \xff\xfe title\n[mdl-file] /dl/clip.mp4\n";
        let stderr: &[u8] = b"WARNING: \xc3\x28 bad bytes\nERROR: unable to download video data\n";

        let drained = drain(stdout, stderr, &RecordingHooks::default())
            .await
            .unwrap();

        assert_eq!(drained.final_path, Some(PathBuf::from("/dl/clip.mp4")));
        assert_eq!(
            drained.error_line.as_deref(),
            Some("ERROR: unable to download video data")
        );
    }

    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn acquire_reports_progress_and_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ytdlp(
            dir.path(),
            "echo '[youtube] abc: Downloading webpage'\n\
             echo '[mdl] downloading|50|100|NA|10|5|avc1|none|/dl/clip.part'\n\
             echo '[mdl] finished|100|100|NA|NA|NA|avc1|none|/dl/clip.part'\n\
             echo '[mdl-pp] started|Merger'\n\
             echo '[mdl-pp] finished|Merger'\n\
             echo '[mdl-file] /dl/clip.mp4'",
        );
        let engine = YtDlpEngine::new(script, None);
        let hooks = RecordingHooks::default();

        let output = engine
            .acquire(
                &request(DownloadPlan::VideoOnly {
                    selector: "best".into(),
                }),
                &hooks,
            )
            .await
            .unwrap();

        assert_eq!(output.final_path, Some(PathBuf::from("/dl/clip.mp4")));
        assert_eq!(hooks.transfers.lock().unwrap().len(), 2);
        assert_eq!(hooks.phases.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn acquire_surfaces_error_line_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ytdlp(
            dir.path(),
            "echo 'ERROR: [youtube] abc: Requested format is not available' >&2\nexit 1",
        );
        let engine = YtDlpEngine::new(script, None);

        let err = engine
            .acquire(
                &request(DownloadPlan::VideoOnly {
                    selector: "22".into(),
                }),
                &RecordingHooks::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "ERROR: [youtube] abc: Requested format is not available"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn acquire_reads_phase_reports_from_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ytdlp(
            dir.path(),
            "echo '[mdl] finished|100|100|NA|NA|NA|avc1|mp4a|/dl/clip.part'\n\
             echo '[mdl-pp] started|ExtractAudio' >&2\n\
             echo '[mdl-pp] finished|ExtractAudio' >&2\n\
             echo '[mdl-file] /dl/clip.m4a'",
        );
        let engine = YtDlpEngine::new(script, None);
        let hooks = RecordingHooks::default();

        let output = engine
            .acquire(
                &request(DownloadPlan::VideoOnly {
                    selector: "best".into(),
                }),
                &hooks,
            )
            .await
            .unwrap();

        assert_eq!(output.final_path, Some(PathBuf::from("/dl/clip.m4a")));
        let phases = hooks.phases.lock().unwrap();
        assert_eq!(phases.len(), 2);
        assert!(phases.iter().all(|p| p.phase == Phase::ExtractAudio));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupted_hook_stops_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ytdlp(
            dir.path(),
            "echo '[mdl] downloading|1|100|NA|NA|NA|NA|NA|/dl/clip.part'\nsleep 30",
        );
        let engine = YtDlpEngine::new(script, None);
        let hooks = RecordingHooks {
            interrupt: true,
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let err = engine
            .acquire(
                &request(DownloadPlan::VideoOnly {
                    selector: "best".into(),
                }),
                &hooks,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn extract_audio_requires_ffmpeg() {
        let engine = YtDlpEngine::new("yt-dlp".into(), None);
        let err = engine
            .extract_audio(Path::new("a.mp4"), Path::new("a.m4a"), AudioFormat::M4a)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Tool(_)));
        assert!(!engine.merge_tool_available());
    }
}
