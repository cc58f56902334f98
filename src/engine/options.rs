//! Engine option builder
//!
//! Turns a task's format selection into a [`DownloadPlan`], the engine-neutral
//! description of what to fetch and which post-processing to run.

use crate::config::AudioFormat;
use crate::error::PlanError;
use crate::types::Task;
use serde::{Deserialize, Serialize};

/// Selector used when the caller asked for an audio container
pub const AUDIO_SELECTOR: &str = "bestaudio/best";

/// Relaxed selector tried after "format not available" when streams can be merged
pub const RELAXED_MERGE_SELECTOR: &str = "bestvideo+bestaudio/best";

/// Relaxed selector tried after "format not available" without a merge tool
pub const RELAXED_SINGLE_SELECTOR: &str = "best";

/// Inputs of the option decision table
#[derive(Debug, Clone, Copy)]
pub struct PlanInputs<'a> {
    /// Selected encoding (`"best"` or empty means no explicit choice)
    pub format_id: &'a str,
    /// Requested output container
    pub output_format: &'a str,
    /// Whether the result should carry audio
    pub include_audio: bool,
    /// The selected encoding carries audio
    pub has_audio: bool,
    /// The selected encoding carries video
    pub has_video: bool,
    /// A merge/transcode tool (ffmpeg) is available
    pub merge_available: bool,
}

impl<'a> PlanInputs<'a> {
    /// Read the decision inputs off a task
    pub fn from_task(task: &'a Task, merge_available: bool) -> Self {
        Self {
            format_id: &task.format_id,
            output_format: &task.output_format,
            include_audio: task.include_audio,
            has_audio: task.has_audio,
            has_video: task.has_video,
            merge_available,
        }
    }

    fn explicit_format(&self) -> Option<&'a str> {
        let id = self.format_id.trim();
        (!id.is_empty() && id != "best").then_some(id)
    }

    fn merge_target(&self) -> Option<String> {
        (self.merge_available && matches!(self.output_format, "mp4" | "webm"))
            .then(|| self.output_format.to_string())
    }

    fn recode_mp4(&self) -> bool {
        self.merge_available && self.output_format == "mp4"
    }
}

/// What the engine should fetch and how to post-process it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadPlan {
    /// Fetch the best audio and transcode it into an audio container
    ExtractAudio {
        /// Target codec/container
        codec: AudioFormat,
        /// Preferred bitrate in kbit/s (mp3 only)
        quality: Option<u32>,
    },
    /// Fetch one encoding that already carries both streams
    Combined {
        /// Format selector
        selector: String,
        /// Container to merge into, when a merge tool is present
        merge_into: Option<String>,
        /// Re-encode into mp4 after download
        recode_mp4: bool,
    },
    /// Fetch video and audio separately and merge them
    MergeStreams {
        /// Format selector (`<video>+bestaudio/best`)
        selector: String,
        /// Container to merge into
        merge_into: Option<String>,
        /// Re-encode into mp4 after merge
        recode_mp4: bool,
    },
    /// Fetch video without audio
    VideoOnly {
        /// Format selector
        selector: String,
    },
}

impl DownloadPlan {
    /// Apply the decision table
    ///
    /// | audio container | include_audio | both streams | merge tool | plan |
    /// |---|---|---|---|---|
    /// | yes | - | - | no | [`PlanError::AudioToolRequired`] |
    /// | yes | - | - | yes | `ExtractAudio` |
    /// | no | yes | yes | any | `Combined` |
    /// | no | yes | no | no | [`PlanError::MergeToolRequired`] |
    /// | no | yes | no | yes | `MergeStreams` |
    /// | no | no | - | - | `VideoOnly` |
    pub fn build(inputs: &PlanInputs<'_>) -> Result<Self, PlanError> {
        if let Some(codec) = AudioFormat::from_container(inputs.output_format) {
            if !inputs.merge_available {
                return Err(PlanError::AudioToolRequired);
            }
            return Ok(DownloadPlan::ExtractAudio {
                codec,
                quality: (codec == AudioFormat::Mp3).then_some(320),
            });
        }

        if !inputs.include_audio {
            let selector = inputs.explicit_format().unwrap_or("bestvideo/best");
            return Ok(DownloadPlan::VideoOnly {
                selector: selector.to_string(),
            });
        }

        if inputs.has_audio && inputs.has_video {
            let selector = match inputs.format_id.trim() {
                "" => "best",
                id => id,
            };
            return Ok(DownloadPlan::Combined {
                selector: selector.to_string(),
                merge_into: inputs.merge_target(),
                recode_mp4: inputs.recode_mp4(),
            });
        }

        if !inputs.merge_available {
            return Err(PlanError::MergeToolRequired);
        }

        let selector = match inputs.explicit_format() {
            Some(id) => format!("{id}+bestaudio/best"),
            None => RELAXED_MERGE_SELECTOR.to_string(),
        };
        Ok(DownloadPlan::MergeStreams {
            selector,
            merge_into: inputs.merge_target(),
            recode_mp4: inputs.recode_mp4(),
        })
    }

    /// Plan for a retry after the selected format turned out to be unavailable
    pub fn relaxed(output_format: &str, merge_available: bool) -> Self {
        if merge_available {
            let inputs = PlanInputs {
                format_id: "best",
                output_format,
                include_audio: true,
                has_audio: false,
                has_video: true,
                merge_available,
            };
            DownloadPlan::MergeStreams {
                selector: RELAXED_MERGE_SELECTOR.to_string(),
                merge_into: inputs.merge_target(),
                recode_mp4: inputs.recode_mp4(),
            }
        } else {
            DownloadPlan::Combined {
                selector: RELAXED_SINGLE_SELECTOR.to_string(),
                merge_into: None,
                recode_mp4: false,
            }
        }
    }

    /// Format selector handed to the engine
    pub fn selector(&self) -> &str {
        match self {
            DownloadPlan::ExtractAudio { .. } => AUDIO_SELECTOR,
            DownloadPlan::Combined { selector, .. }
            | DownloadPlan::MergeStreams { selector, .. }
            | DownloadPlan::VideoOnly { selector } => selector,
        }
    }

    /// Container to merge streams into, if any
    pub fn merge_into(&self) -> Option<&str> {
        match self {
            DownloadPlan::Combined { merge_into, .. }
            | DownloadPlan::MergeStreams { merge_into, .. } => merge_into.as_deref(),
            _ => None,
        }
    }

    /// Whether the result is re-encoded into mp4
    pub fn recode_mp4(&self) -> bool {
        match self {
            DownloadPlan::Combined { recode_mp4, .. }
            | DownloadPlan::MergeStreams { recode_mp4, .. } => *recode_mp4,
            _ => false,
        }
    }
}

/// Requested container, downgraded to the encoding's native extension when
/// no merge tool could remux a combined stream into it
///
/// Audio containers are never downgraded; they need the transcoder anyway.
pub fn effective_container(task: &Task, merge_available: bool) -> String {
    if !merge_available
        && !task.wants_audio_container()
        && task.include_audio
        && task.has_audio
        && task.has_video
        && !task.format_ext.is_empty()
        && task.format_ext != task.output_format
    {
        return task.format_ext.clone();
    }
    task.output_format.clone()
}
