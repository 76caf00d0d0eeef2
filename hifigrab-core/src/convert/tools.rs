use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConversionSection, ToolsSection};
use crate::identifier::MediaId;
use crate::retry::{RetryPolicy, RetryableError};

use super::filters::FilterChain;
use super::types::AudioTarget;

/// Postprocessor arguments handed to yt-dlp when it extracts audio.
const HI_RES_EXTRACT_ARGS: &str = "FFmpegExtractAudio:-c:a pcm_s32le -ar 384000 -sample_fmt s32 -ac 2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Acquisition,
    Transcoder,
    Prober,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Acquisition => f.write_str("acquisition"),
            ToolKind::Transcoder => f.write_str("transcoder"),
            ToolKind::Prober => f.write_str("prober"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    fn new(tool: ToolKind, program: &str) -> Self {
        Self {
            tool,
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    fn path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// The invocation rendered for logs; never passed to a shell.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for ToolOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput>;
}

/// Runs tools as child processes. Dropping the future kills the child.
#[derive(Debug, Default)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .args(&invocation.args);
        let output = command.output().await?;
        Ok(output.into())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {status:?}")]
    Exit {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{stage} timed out after {}s", limit.as_secs())]
    Timeout { stage: String, limit: Duration },
}

impl RetryableError for ToolError {
    fn is_retryable(&self) -> bool {
        !matches!(self, ToolError::Spawn { .. })
    }

    fn timed_out(stage: &str, limit: Duration) -> Self {
        ToolError::Timeout {
            stage: stage.to_string(),
            limit,
        }
    }
}

/// Runs one invocation and treats a non-zero exit as an error.
pub async fn run_checked(
    runner: &dyn ProcessRunner,
    invocation: &ToolInvocation,
) -> Result<ToolOutput, ToolError> {
    debug!(tool = %invocation.tool, command = %invocation.command_line(), "running tool");
    let output = runner
        .run(invocation)
        .await
        .map_err(|source| ToolError::Spawn {
            command: invocation.command_line(),
            source,
        })?;
    if !output.success {
        return Err(ToolError::Exit {
            command: invocation.command_line(),
            status: output.status,
            stderr: output.stderr,
        });
    }
    if !output.stderr.trim().is_empty() {
        debug!(tool = %invocation.tool, stderr = %output.stderr.trim(), "tool stderr");
    }
    Ok(output)
}

/// Runs one invocation under `policy`, so its per-attempt timeout applies.
pub async fn run_with_policy(
    runner: &dyn ProcessRunner,
    policy: &RetryPolicy,
    stage: &str,
    invocation: &ToolInvocation,
) -> Result<ToolOutput, ToolError> {
    policy
        .run(stage, move |_| run_checked(runner, invocation))
        .await
        .map(|outcome| outcome.result)
}

/// Builds the command lines for every external tool the pipeline uses.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    tools: ToolsSection,
    user_agent: String,
    lossy_bitrate: String,
    mp3_bitrate: String,
}

impl ToolCommands {
    pub fn new(tools: ToolsSection, conversion: &ConversionSection) -> Self {
        Self {
            tools,
            user_agent: conversion.user_agent.clone(),
            lossy_bitrate: conversion.lossy_bitrate.clone(),
            mp3_bitrate: conversion.mp3_bitrate.clone(),
        }
    }

    pub fn title_query(&self, media: &MediaId) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Acquisition, &self.tools.yt_dlp)
            .args(["--get-title", "--no-playlist", "--user-agent"])
            .arg(self.user_agent.as_str())
            .arg(media.watch_url())
    }

    fn fetch_base(&self) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Acquisition, &self.tools.yt_dlp)
            .args(["--no-playlist", "--no-mtime", "--add-metadata", "--user-agent"])
            .arg(self.user_agent.as_str())
            .arg("--restrict-filenames")
    }

    /// Audio-only fetch, extracted straight to a hi-res wav.
    pub fn fetch_audio(&self, media: &MediaId, output: &Path) -> ToolInvocation {
        self.fetch_base()
            .args(["--extract-audio", "--audio-format", "wav", "--postprocessor-args"])
            .arg(HI_RES_EXTRACT_ARGS)
            .arg("-o")
            .path(output)
            .arg(media.watch_url())
    }

    pub fn fetch_video(&self, media: &MediaId, output: &Path) -> ToolInvocation {
        self.fetch_base()
            .args(["--merge-output-format", "mp4", "-o"])
            .path(output)
            .arg(media.watch_url())
    }

    pub fn extract_audio(&self, video: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Transcoder, &self.tools.ffmpeg)
            .args(["-y", "-i"])
            .path(video)
            .args(["-vn", "-acodec", "pcm_f32le", "-ar", "96000", "-ac", "2"])
            .path(output)
    }

    pub fn probe(&self, path: &Path) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Prober, &self.tools.ffprobe)
            .arg("-i")
            .path(path)
            .args([
                "-show_entries",
                "stream=sample_rate,bits_per_sample,bit_rate",
                "-v",
                "quiet",
                "-of",
                "json",
            ])
    }

    pub fn encode_audio(
        &self,
        input: &Path,
        chain: &FilterChain,
        target: AudioTarget,
        output: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Transcoder, &self.tools.ffmpeg)
            .args(["-y", "-i"])
            .path(input)
            .arg("-af")
            .arg(chain.to_ffmpeg_arg())
            .args(self.codec_args(target))
            .path(output)
    }

    /// Intermediate lossless render of the filtered audio, muxed later.
    pub fn enhance_audio(&self, input: &Path, chain: &FilterChain, output: &Path) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Transcoder, &self.tools.ffmpeg)
            .args(["-y", "-i"])
            .path(input)
            .arg("-af")
            .arg(chain.to_ffmpeg_arg())
            .args([
                "-c:a",
                "pcm_s32le",
                "-ar",
                "384000",
                "-sample_fmt",
                "s32",
                "-ac",
                "2",
            ])
            .path(output)
    }

    pub fn mux(&self, video: &Path, audio: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Transcoder, &self.tools.ffmpeg)
            .args(["-y", "-i"])
            .path(video)
            .arg("-i")
            .path(audio)
            .args([
                "-map", "0:v:0", "-map", "1:a:0", "-c:v", "libx264", "-preset", "medium", "-c:a",
                "aac", "-b:a",
            ])
            .arg(self.lossy_bitrate.as_str())
            .args(["-ar", "96000", "-pix_fmt", "yuv420p", "-shortest"])
            .path(output)
    }

    fn codec_args(&self, target: AudioTarget) -> Vec<String> {
        let args: Vec<&str> = match target {
            AudioTarget::Mp3 => vec![
                "-c:a",
                "libmp3lame",
                "-b:a",
                self.mp3_bitrate.as_str(),
                "-ar",
                "48000",
                "-ac",
                "2",
                "-sample_fmt",
                "s32p",
                "-f",
                "mp3",
            ],
            AudioTarget::Mp4Aac => vec![
                "-c:a",
                "aac",
                "-b:a",
                self.lossy_bitrate.as_str(),
                "-ar",
                "96000",
                "-ac",
                "2",
                "-vn",
            ],
            AudioTarget::M4a => vec![
                "-c:a",
                "alac",
                "-ar",
                "384000",
                "-ac",
                "2",
                "-sample_fmt",
                "s32p",
                "-vn",
            ],
            AudioTarget::Wav => vec![
                "-c:a",
                "pcm_s32le",
                "-ar",
                "384000",
                "-ac",
                "2",
                "-sample_fmt",
                "s32",
                "-vn",
            ],
            AudioTarget::Flac => vec![
                "-c:a",
                "flac",
                "-ar",
                "384000",
                "-ac",
                "2",
                "-sample_fmt",
                "s32",
                "-vn",
            ],
        };
        args.into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::filters::{EqPreset, FilterChainBuilder, NoiseAssessment};
    use crate::convert::types::{EnhanceOptions, TargetFormat};

    fn commands() -> ToolCommands {
        ToolCommands::new(ToolsSection::default(), &ConversionSection::default())
    }

    #[test]
    fn audio_fetch_uses_hi_res_postprocessor() {
        let media = MediaId::new("dQw4w9WgXcQ");
        let invocation = commands().fetch_audio(&media, Path::new("/dl/Song_temp.wav"));
        assert_eq!(invocation.program, "yt-dlp");
        assert_eq!(invocation.tool, ToolKind::Acquisition);
        let args = invocation.args.join(" ");
        assert!(args.starts_with("--no-playlist --no-mtime --add-metadata --user-agent"));
        assert!(args.contains("--restrict-filenames"));
        assert!(args.contains("--extract-audio --audio-format wav"));
        assert!(invocation.args.contains(&HI_RES_EXTRACT_ARGS.to_string()));
        assert!(args.ends_with("-o /dl/Song_temp.wav https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn mp3_encode_uses_lame_at_48k() {
        let chain = FilterChainBuilder::build(
            TargetFormat::Mp3,
            false,
            EnhanceOptions::default(),
            NoiseAssessment::unknown(),
        );
        assert_eq!(chain.preset, EqPreset::Light);
        let invocation = commands().encode_audio(
            Path::new("in.wav"),
            &chain,
            AudioTarget::Mp3,
            Path::new("out.mp3"),
        );
        let args = invocation.args.join(" ");
        assert!(args.contains("-c:a libmp3lame -b:a 320k -ar 48000 -ac 2 -sample_fmt s32p -f mp3"));
        assert_eq!(invocation.args.last().map(String::as_str), Some("out.mp3"));
    }

    #[test]
    fn mux_maps_video_and_enhanced_audio() {
        let invocation = commands().mux(
            Path::new("v.mp4"),
            Path::new("a.wav"),
            Path::new("out.mp4"),
        );
        assert_eq!(
            invocation.args.join(" "),
            "-y -i v.mp4 -i a.wav -map 0:v:0 -map 1:a:0 -c:v libx264 -preset medium -c:a aac \
             -b:a 4000k -ar 96000 -pix_fmt yuv420p -shortest out.mp4"
        );
    }

    #[test]
    fn command_line_quotes_arguments_with_spaces() {
        let invocation = ToolInvocation::new(ToolKind::Prober, "ffprobe")
            .arg("-i")
            .arg("/My Music/a.wav");
        assert_eq!(invocation.command_line(), "ffprobe -i \"/My Music/a.wav\"");
    }
}
