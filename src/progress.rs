//! Progress model: maps engine reports onto one 0-100 figure per task
//!
//! A task's pipeline can have several legs (separate video and audio transfers,
//! a merge, an audio transcode). Each leg owns a fixed slice of the range:
//!
//! | model | leg | range |
//! |---|---|---|
//! | `Direct` | transfer | 0-100 |
//! | `Direct` | any phase | floor 95 |
//! | `MergeStreams` | video stream | 0-45 |
//! | `MergeStreams` | audio stream | 45-90 |
//! | `MergeStreams` | unclassified stream | 0-90 |
//! | `MergeStreams` | merge | 95 |
//! | `ExtractAudio` | transfer | 0-90 |
//! | `ExtractAudio` | extraction | 90-95 |
//!
//! Every model ends at 100 when a phase reports `Finished`.

use crate::engine::{DownloadPlan, Phase, PhaseState, PhaseUpdate, TransferStatus, TransferUpdate};
use crate::types::{Stage, Task};

/// Percent assigned to late post-processing
const POST_PROCESS_FLOOR: f64 = 95.0;

/// Where transfer ends and extraction begins in the audio pipeline
const EXTRACT_START: f64 = 90.0;

/// Weighting strategy for a task's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressModel {
    /// A single transfer
    Direct,
    /// Video and audio fetched separately, then merged
    MergeStreams,
    /// Audio fetched, then transcoded
    ExtractAudio,
}

/// What applying a report did to the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The stage change was allowed (false once the task is cancelled)
    pub accepted: bool,
    /// A new percent was written
    pub percent_written: bool,
}

impl ProgressModel {
    /// Model matching the plan the engine will execute
    pub fn for_plan(plan: &DownloadPlan) -> Self {
        match plan {
            DownloadPlan::ExtractAudio { .. } => ProgressModel::ExtractAudio,
            DownloadPlan::MergeStreams { .. } => ProgressModel::MergeStreams,
            DownloadPlan::Combined { .. } | DownloadPlan::VideoOnly { .. } => {
                ProgressModel::Direct
            }
        }
    }

    /// Stage implied by a transfer report
    ///
    /// Only split downloads distinguish the two sub-streams, by which codec the
    /// stream being transferred carries.
    pub fn transfer_stage(&self, update: &TransferUpdate) -> Stage {
        if *self != ProgressModel::MergeStreams {
            return Stage::Downloading;
        }
        let video = codec_present(update.vcodec.as_deref());
        let audio = codec_present(update.acodec.as_deref());
        match (video, audio) {
            (true, false) => Stage::DownloadingVideo,
            (false, true) => Stage::DownloadingAudio,
            _ => Stage::Downloading,
        }
    }

    /// Overall percent for a transfer `fraction` (0.0 to 1.0) in `stage`
    pub fn transfer_percent(&self, stage: Stage, fraction: f64) -> f64 {
        let fraction = fraction.clamp(0.0, 1.0);
        let (base, span) = match (self, stage) {
            (ProgressModel::Direct, _) => (0.0, 100.0),
            (ProgressModel::ExtractAudio, _) => (0.0, EXTRACT_START),
            (ProgressModel::MergeStreams, Stage::DownloadingVideo) => (0.0, 45.0),
            (ProgressModel::MergeStreams, Stage::DownloadingAudio) => (45.0, 45.0),
            (ProgressModel::MergeStreams, _) => (0.0, 90.0),
        };
        base + span * fraction
    }

    /// Stage a post-processing phase runs in
    pub fn phase_stage(phase: Phase) -> Stage {
        match phase {
            Phase::Merge => Stage::Merging,
            Phase::ExtractAudio => Stage::ExtractingAudio,
            Phase::Convert => Stage::Processing,
        }
    }

    /// Overall percent for a phase report
    pub fn phase_percent(&self, update: &PhaseUpdate) -> f64 {
        match (self, update.phase, update.state) {
            (_, _, PhaseState::Finished) => 100.0,
            (ProgressModel::ExtractAudio, Phase::ExtractAudio, PhaseState::Started) => {
                EXTRACT_START
            }
            (ProgressModel::ExtractAudio, Phase::ExtractAudio, PhaseState::Progress(f)) => {
                EXTRACT_START + (POST_PROCESS_FLOOR - EXTRACT_START) * f.clamp(0.0, 1.0)
            }
            _ => POST_PROCESS_FLOOR,
        }
    }

    /// Fold a transfer report into `task`
    ///
    /// Counters are always copied; the stage only moves when the transition
    /// table allows it, and percent only when the total is known (or the
    /// transfer finished). Within a run percent never goes down; `fresh_run`
    /// lets the first figure of a new run replace the old one.
    pub fn apply_transfer(&self, task: &mut Task, update: &TransferUpdate, fresh_run: bool) -> Applied {
        let stage = self.transfer_stage(update);
        if !task.transition(stage) {
            return Applied {
                accepted: false,
                percent_written: false,
            };
        }

        let total = update.total();
        let progress = &mut task.progress;
        progress.downloaded_bytes = update.downloaded_bytes;
        if total > 0 {
            progress.total_bytes = total;
        }
        progress.speed = update.speed.unwrap_or(0.0);
        progress.eta = update.eta;
        if let Some(filename) = update.filename.as_deref().filter(|f| !f.is_empty()) {
            progress.filename = filename.to_string();
        }

        let fraction = match update.status {
            TransferStatus::Finished => Some(1.0),
            TransferStatus::Downloading if total > 0 => {
                Some(update.downloaded_bytes as f64 / total as f64)
            }
            TransferStatus::Downloading => None,
        };

        let percent_written = match fraction {
            Some(fraction) => {
                let next = self.transfer_percent(stage, fraction);
                progress.percent = advance(progress.percent, next, fresh_run);
                true
            }
            None => false,
        };

        Applied {
            accepted: true,
            percent_written,
        }
    }

    /// Fold a phase report into `task`
    pub fn apply_phase(&self, task: &mut Task, update: &PhaseUpdate, fresh_run: bool) -> Applied {
        let stage = match update.state {
            PhaseState::Finished => Stage::Processing,
            _ => Self::phase_stage(update.phase),
        };
        if !task.transition(stage) {
            return Applied {
                accepted: false,
                percent_written: false,
            };
        }

        let next = self.phase_percent(update);
        task.progress.percent = advance(task.progress.percent, next, fresh_run);
        Applied {
            accepted: true,
            percent_written: true,
        }
    }
}

/// A codec is absent when missing, empty or "none"
fn codec_present(codec: Option<&str>) -> bool {
    match codec.map(str::trim) {
        None | Some("") => false,
        Some(c) => !c.eq_ignore_ascii_case("none"),
    }
}

fn advance(current: f64, next: f64, fresh_run: bool) -> f64 {
    let next = next.clamp(0.0, 100.0);
    if fresh_run { next } else { current.max(next) }
}
