use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::identifier::MediaId;

use super::error::ConversionError;
use super::probe::AudioProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    M4a,
    Wav,
    Flac,
    Mp4,
    Mp3,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 5] = [
        TargetFormat::M4a,
        TargetFormat::Wav,
        TargetFormat::Flac,
        TargetFormat::Mp4,
        TargetFormat::Mp3,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::M4a => "m4a",
            TargetFormat::Wav => "wav",
            TargetFormat::Flac => "flac",
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Mp3 => "mp3",
        }
    }

    /// Upper-case name used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            TargetFormat::M4a => "M4A",
            TargetFormat::Wav => "WAV",
            TargetFormat::Flac => "FLAC",
            TargetFormat::Mp4 => "MP4",
            TargetFormat::Mp3 => "MP3",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = ConversionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "m4a" => Ok(TargetFormat::M4a),
            "wav" => Ok(TargetFormat::Wav),
            "flac" => Ok(TargetFormat::Flac),
            "mp4" => Ok(TargetFormat::Mp4),
            "mp3" => Ok(TargetFormat::Mp3),
            other => Err(ConversionError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnhanceOptions {
    pub reverb: bool,
    pub widening: bool,
}

impl EnhanceOptions {
    pub fn any(&self) -> bool {
        self.reverb || self.widening
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub source_url: String,
    pub format: TargetFormat,
    pub include_video: bool,
    pub enhance: EnhanceOptions,
}

/// Codec settings for a single-input audio encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioTarget {
    /// libmp3lame, 48 kHz.
    Mp3,
    /// AAC in an mp4 container, 96 kHz, no video stream.
    Mp4Aac,
    /// Apple lossless, 384 kHz / 32-bit.
    M4a,
    /// PCM s32le, 384 kHz.
    Wav,
    Flac,
}

impl AudioTarget {
    pub fn for_format(format: TargetFormat) -> Self {
        match format {
            TargetFormat::Mp3 => AudioTarget::Mp3,
            TargetFormat::Mp4 => AudioTarget::Mp4Aac,
            TargetFormat::M4a => AudioTarget::M4a,
            TargetFormat::Wav => AudioTarget::Wav,
            TargetFormat::Flac => AudioTarget::Flac,
        }
    }
}

/// What the acquisition and encode stages do for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPlan {
    /// Fetch audio only, then encode it straight to the target.
    AudioOnly { target: AudioTarget },
    /// Fetch the full video and pull a hi-res audio track out of it.
    WithVideo {
        temp_video: PathBuf,
        output: VideoOutput,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutput {
    /// Enhance the audio into an intermediate wav, then mux it with the video.
    Mux { enhanced_audio: PathBuf },
    /// Video was fetched but only the encoded audio is kept.
    AudioOnly(AudioTarget),
}

impl JobPlan {
    pub fn derive(format: TargetFormat, include_video: bool, dir: &Path, title: &str) -> Self {
        if !include_video {
            return JobPlan::AudioOnly {
                target: AudioTarget::for_format(format),
            };
        }
        let temp_video = dir.join(format!("{title}_temp_video.mp4"));
        let output = match format {
            TargetFormat::Mp4 => VideoOutput::Mux {
                enhanced_audio: dir.join(format!("{title}_enhanced_audio.wav")),
            },
            other => VideoOutput::AudioOnly(AudioTarget::for_format(other)),
        };
        JobPlan::WithVideo { temp_video, output }
    }

    pub fn temp_video(&self) -> Option<&Path> {
        match self {
            JobPlan::WithVideo { temp_video, .. } => Some(temp_video),
            JobPlan::AudioOnly { .. } => None,
        }
    }

    pub fn enhanced_audio(&self) -> Option<&Path> {
        match self {
            JobPlan::WithVideo {
                output: VideoOutput::Mux { enhanced_audio },
                ..
            } => Some(enhanced_audio),
            _ => None,
        }
    }
}

/// A fully resolved conversion: every path it may touch is known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub source_url: String,
    pub media_id: MediaId,
    pub title: String,
    pub format: TargetFormat,
    pub include_video: bool,
    pub enhance: EnhanceOptions,
    pub temp_audio: PathBuf,
    pub final_output: PathBuf,
    pub plan: JobPlan,
}

impl ConversionJob {
    /// Intermediate artifacts removed once the job finishes either way.
    pub fn temporaries(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.temp_audio.clone()];
        if let Some(video) = self.plan.temp_video() {
            paths.push(video.to_path_buf());
        }
        if let Some(enhanced) = self.plan.enhanced_audio() {
            paths.push(enhanced.to_path_buf());
        }
        paths
    }

    /// Everything a failed run must remove, the final output included.
    pub fn cleanup_set(&self) -> Vec<PathBuf> {
        let mut paths = self.temporaries();
        paths.push(self.final_output.clone());
        paths
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Resolving,
    Acquiring,
    ProbingBefore,
    Encoding,
    ProbingAfter,
    Finalizing,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Resolving => "resolving",
            PipelineStage::Acquiring => "acquiring",
            PipelineStage::ProbingBefore => "probing_before",
            PipelineStage::Encoding => "encoding",
            PipelineStage::ProbingAfter => "probing_after",
            PipelineStage::Finalizing => "finalizing",
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineStage::Resolving => FailureKind::InvalidInput,
            PipelineStage::Acquiring => FailureKind::AcquisitionFailure,
            PipelineStage::Encoding | PipelineStage::Finalizing => FailureKind::EncodingFailure,
            PipelineStage::ProbingBefore | PipelineStage::ProbingAfter => {
                FailureKind::ProbeFailure
            }
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one conversion. Each variant owns the artifacts created so far.
#[derive(Debug)]
pub enum PipelineState {
    Resolving(ConversionRequest),
    Acquiring(ConversionJob),
    ProbingBefore(ConversionJob),
    Encoding {
        job: ConversionJob,
        before: AudioProbe,
    },
    ProbingAfter {
        job: ConversionJob,
        before: AudioProbe,
    },
    Finalizing {
        job: ConversionJob,
        before: AudioProbe,
        after: AudioProbe,
    },
    Done(ConversionOutcome),
    Failed {
        error: ConversionError,
        cleanup: Vec<PathBuf>,
    },
}

impl PipelineState {
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineState::Resolving(_) => Some(PipelineStage::Resolving),
            PipelineState::Acquiring(_) => Some(PipelineStage::Acquiring),
            PipelineState::ProbingBefore(_) => Some(PipelineStage::ProbingBefore),
            PipelineState::Encoding { .. } => Some(PipelineStage::Encoding),
            PipelineState::ProbingAfter { .. } => Some(PipelineStage::ProbingAfter),
            PipelineState::Finalizing { .. } => Some(PipelineStage::Finalizing),
            PipelineState::Done(_) | PipelineState::Failed { .. } => None,
        }
    }

    pub fn job(&self) -> Option<&ConversionJob> {
        match self {
            PipelineState::Acquiring(job) | PipelineState::ProbingBefore(job) => Some(job),
            PipelineState::Encoding { job, .. }
            | PipelineState::ProbingAfter { job, .. }
            | PipelineState::Finalizing { job, .. } => Some(job),
            _ => None,
        }
    }

    /// Paths that must be removed if the run fails from this state.
    pub fn cleanup_set(&self) -> Vec<PathBuf> {
        match self {
            PipelineState::Failed { cleanup, .. } => cleanup.clone(),
            other => other.job().map(ConversionJob::cleanup_set).unwrap_or_default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done(_) | PipelineState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub output_path: PathBuf,
    pub format: TargetFormat,
    pub media_id: MediaId,
    pub title: String,
    pub before: AudioProbe,
    pub after: AudioProbe,
}

impl ConversionOutcome {
    pub fn message(&self) -> String {
        format!("{} saved using video title", self.format.label())
    }
}
