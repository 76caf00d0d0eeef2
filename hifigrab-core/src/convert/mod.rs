mod error;
pub mod filters;
mod paths;
pub mod probe;
pub mod tools;
mod types;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::classify::is_accepted_url;
use crate::clock::{Clock, SystemClock};
use crate::config::HifigrabConfig;
use crate::identifier::{resolve_id, TitleResolver};
use crate::retry::RetryPolicy;

pub use error::{ConversionError, ConversionResult};
pub use filters::{EqPreset, FilterChain, FilterChainBuilder, FilterStage, NoiseAssessment};
pub use paths::OutputPathAllocator;
pub use probe::{AudioProbe, SpectrumBin};
pub use tools::{
    ProcessRunner, SystemProcessRunner, ToolCommands, ToolError, ToolInvocation, ToolKind,
    ToolOutput,
};
pub use types::{
    AudioTarget, ConversionJob, ConversionOutcome, ConversionRequest, EnhanceOptions, JobPlan,
    PipelineStage, PipelineState, TargetFormat, VideoOutput,
};

/// Drives one conversion from a source url to a finished file.
///
/// The run is a sequence of [`PipelineState`] transitions made by
/// [`ConversionPipeline::step`]; [`ConversionPipeline::convert`] loops until a
/// terminal state and removes the failed state's cleanup set.
pub struct ConversionPipeline {
    runner: Arc<dyn ProcessRunner>,
    commands: Arc<ToolCommands>,
    titles: TitleResolver,
    allocator: OutputPathAllocator,
    acquire_policy: RetryPolicy,
    encode_policy: RetryPolicy,
    probe_policy: RetryPolicy,
}

impl fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("downloads_dir", &self.allocator.dir())
            .field("commands", &self.commands)
            .finish()
    }
}

impl ConversionPipeline {
    pub fn new(
        config: &HifigrabConfig,
        downloads_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self::with_clock(config, downloads_dir, runner, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &HifigrabConfig,
        downloads_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let conversion = &config.conversion;
        let commands = Arc::new(ToolCommands::new(config.tools.clone(), conversion));
        let probe_policy =
            RetryPolicy::single_attempt().with_timeout(Some(conversion.probe_timeout()));
        let titles = TitleResolver::new(
            Arc::clone(&runner),
            Arc::clone(&commands),
            probe_policy.clone(),
            clock,
        );
        Self {
            runner,
            commands,
            titles,
            allocator: OutputPathAllocator::new(downloads_dir),
            acquire_policy: RetryPolicy::single_attempt()
                .with_timeout(Some(conversion.acquire_timeout())),
            encode_policy: RetryPolicy::single_attempt()
                .with_timeout(Some(conversion.encode_timeout())),
            probe_policy,
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        self.allocator.dir()
    }

    /// Runs a request to completion. Dropping the returned future before it
    /// finishes still removes every artifact the run created.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult<ConversionOutcome> {
        let mut guard = CleanupGuard::default();
        let mut state = PipelineState::Resolving(request);
        loop {
            state = match state {
                PipelineState::Done(outcome) => {
                    guard.disarm();
                    return Ok(outcome);
                }
                PipelineState::Failed { error, cleanup } => {
                    warn!(stage = %error.stage(), kind = %error.kind(), error = %error, "conversion failed");
                    guard.track(cleanup.clone());
                    remove_all(&cleanup).await;
                    guard.disarm();
                    return Err(error);
                }
                other => {
                    guard.track(pending_cleanup(&other));
                    self.step(other).await
                }
            };
        }
    }

    /// Performs exactly one transition. Terminal states are returned as-is.
    pub async fn step(&self, state: PipelineState) -> PipelineState {
        match state {
            PipelineState::Resolving(request) => match self.resolve(request).await {
                Ok(job) => PipelineState::Acquiring(job),
                Err(error) => PipelineState::Failed {
                    error,
                    cleanup: Vec::new(),
                },
            },
            PipelineState::Acquiring(job) => match self.acquire(&job).await {
                Ok(()) => PipelineState::ProbingBefore(job),
                Err(error) => fail(&job, error),
            },
            PipelineState::ProbingBefore(job) => {
                let before = self
                    .probe(&job.temp_audio, PipelineStage::ProbingBefore)
                    .await
                    .unwrap_or_else(AudioProbe::unknown);
                info!(media_id = %job.media_id, "before conversion: {}", before.summary());
                PipelineState::Encoding { job, before }
            }
            PipelineState::Encoding { job, before } => match self.encode(&job, &before).await {
                Ok(()) => PipelineState::ProbingAfter { job, before },
                Err(error) => fail(&job, error),
            },
            PipelineState::ProbingAfter { job, before } => {
                if !exists(&job.final_output).await {
                    let error = ConversionError::MissingArtifact {
                        stage: PipelineStage::ProbingAfter,
                        path: job.final_output.clone(),
                    };
                    return fail(&job, error);
                }
                let after = self
                    .probe(&job.final_output, PipelineStage::ProbingAfter)
                    .await
                    .unwrap_or_else(AudioProbe::unknown);
                info!(media_id = %job.media_id, "after conversion: {}", after.summary());
                PipelineState::Finalizing { job, before, after }
            }
            PipelineState::Finalizing { job, before, after } => {
                remove_all(&job.temporaries()).await;
                info!(
                    path = %job.final_output.display(),
                    "{} saved", job.format.label()
                );
                PipelineState::Done(ConversionOutcome {
                    output_path: job.final_output,
                    format: job.format,
                    media_id: job.media_id,
                    title: job.title,
                    before,
                    after,
                })
            }
            terminal @ (PipelineState::Done(_) | PipelineState::Failed { .. }) => terminal,
        }
    }

    async fn resolve(&self, request: ConversionRequest) -> ConversionResult<ConversionJob> {
        let url = request.source_url.trim().to_string();
        if !is_accepted_url(&url) {
            return Err(ConversionError::InvalidUrl { url });
        }
        let media_id = resolve_id(&url)?;

        let dir = self.allocator.dir().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| ConversionError::Io {
                stage: PipelineStage::Resolving,
                path: dir.clone(),
                source,
            })?;

        let title = self.titles.resolve_title(&media_id).await;
        let final_output = self.allocator.allocate(&title, request.format.extension());
        let temp_audio = dir.join(format!("{title}_temp.wav"));
        let plan = JobPlan::derive(request.format, request.include_video, &dir, &title);
        info!(
            media_id = %media_id,
            title = %title,
            format = %request.format,
            include_video = request.include_video,
            output = %final_output.display(),
            "conversion resolved"
        );
        Ok(ConversionJob {
            source_url: url,
            media_id,
            title,
            format: request.format,
            include_video: request.include_video,
            enhance: request.enhance,
            temp_audio,
            final_output,
            plan,
        })
    }

    async fn acquire(&self, job: &ConversionJob) -> ConversionResult<()> {
        let stage = PipelineStage::Acquiring;
        match &job.plan {
            JobPlan::AudioOnly { .. } => {
                let fetch = self.commands.fetch_audio(&job.media_id, &job.temp_audio);
                self.run_tool(stage, &self.acquire_policy, &fetch).await?;
            }
            JobPlan::WithVideo { temp_video, .. } => {
                let fetch = self.commands.fetch_video(&job.media_id, temp_video);
                self.run_tool(stage, &self.acquire_policy, &fetch).await?;
                require(stage, temp_video).await?;
                let extract = self.commands.extract_audio(temp_video, &job.temp_audio);
                self.run_tool(stage, &self.acquire_policy, &extract).await?;
            }
        }
        require(stage, &job.temp_audio).await
    }

    async fn encode(&self, job: &ConversionJob, before: &AudioProbe) -> ConversionResult<()> {
        let stage = PipelineStage::Encoding;
        let noise = before.noise_assessment();
        if noise.needs_reduction() {
            info!(hum = noise.hum, hiss = noise.hiss, "noise detected, applying reduction");
        }
        let chain = FilterChainBuilder::build(job.format, job.include_video, job.enhance, noise);
        debug!(preset = ?chain.preset, filter = %chain.to_ffmpeg_arg(), "filter chain");

        match &job.plan {
            JobPlan::AudioOnly { target }
            | JobPlan::WithVideo {
                output: VideoOutput::AudioOnly(target),
                ..
            } => {
                let encode =
                    self.commands
                        .encode_audio(&job.temp_audio, &chain, *target, &job.final_output);
                self.run_tool(stage, &self.encode_policy, &encode).await?;
            }
            JobPlan::WithVideo {
                temp_video,
                output: VideoOutput::Mux { enhanced_audio },
            } => {
                let enhance = self
                    .commands
                    .enhance_audio(&job.temp_audio, &chain, enhanced_audio);
                self.run_tool(stage, &self.encode_policy, &enhance).await?;
                require(stage, enhanced_audio).await?;
                let mux = self
                    .commands
                    .mux(temp_video, enhanced_audio, &job.final_output);
                self.run_tool(stage, &self.encode_policy, &mux).await?;
            }
        }
        Ok(())
    }

    async fn probe(&self, path: &Path, stage: PipelineStage) -> Option<AudioProbe> {
        let invocation = self.commands.probe(path);
        let output = match tools::run_with_policy(
            self.runner.as_ref(),
            &self.probe_policy,
            stage.as_str(),
            &invocation,
        )
        .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(stage = %stage, path = %path.display(), error = %err, "probe failed");
                return None;
            }
        };
        match AudioProbe::parse(&output.stdout) {
            Ok(probe) => Some(probe),
            Err(err) => {
                warn!(stage = %stage, path = %path.display(), error = %err, "probe output unreadable");
                None
            }
        }
    }

    async fn run_tool(
        &self,
        stage: PipelineStage,
        policy: &RetryPolicy,
        invocation: &ToolInvocation,
    ) -> ConversionResult<ToolOutput> {
        info!(stage = %stage, command = %invocation.command_line(), "starting {}", invocation.tool);
        let started = tokio::time::Instant::now();
        let output = tools::run_with_policy(self.runner.as_ref(), policy, stage.as_str(), invocation)
            .await
            .map_err(|source| ConversionError::Tool { stage, source })?;
        debug!(
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{} finished", invocation.tool
        );
        Ok(output)
    }
}

fn fail(job: &ConversionJob, error: ConversionError) -> PipelineState {
    PipelineState::Failed {
        error,
        cleanup: job.cleanup_set(),
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn require(stage: PipelineStage, path: &Path) -> ConversionResult<()> {
    if exists(path).await {
        Ok(())
    } else {
        Err(ConversionError::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

/// What must go if the run stops while `state` is in flight. Once
/// finalizing, the output is complete and only intermediates are at stake.
fn pending_cleanup(state: &PipelineState) -> Vec<PathBuf> {
    match state {
        PipelineState::Finalizing { job, .. } => job.temporaries(),
        other => other.cleanup_set(),
    }
}

/// Removes each path independently; a missing file is not an error.
async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        log_removal(path, fs::remove_file(path).await);
    }
}

fn remove_all_blocking(paths: &[PathBuf]) {
    for path in paths {
        log_removal(path, std::fs::remove_file(path));
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove artifact"),
    }
}

/// Holds the cleanup set of the state in flight and removes it when dropped
/// while still armed.
#[derive(Debug, Default)]
struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    fn track(&mut self, paths: Vec<PathBuf>) {
        self.paths = paths;
    }

    fn disarm(&mut self) {
        self.paths.clear();
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        warn!(artifacts = self.paths.len(), "conversion abandoned, removing artifacts");
        remove_all_blocking(&self.paths);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn removal_continues_past_a_stuck_path() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a_temp.wav");
        let stuck = dir.path().join("a_temp_video.mp4");
        let last = dir.path().join("a.mp4");
        std::fs::write(&first, b"x").unwrap();
        std::fs::create_dir(&stuck).unwrap();
        std::fs::write(stuck.join("inner"), b"x").unwrap();
        std::fs::write(&last, b"x").unwrap();

        remove_all(&[first.clone(), stuck.clone(), last.clone()]).await;

        assert!(!first.exists());
        assert!(stuck.exists());
        assert!(!last.exists());
    }

    #[test]
    fn dropped_guard_removes_tracked_paths() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("song_temp.wav");
        let missing = dir.path().join("song.flac");
        std::fs::write(&temp, b"x").unwrap();

        let mut guard = CleanupGuard::default();
        guard.track(vec![temp.clone(), missing]);
        drop(guard);

        assert!(!temp.exists());
    }

    #[test]
    fn disarmed_guard_leaves_files() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("song.flac");
        std::fs::write(&output, b"x").unwrap();

        let mut guard = CleanupGuard::default();
        guard.track(vec![output.clone()]);
        guard.disarm();
        drop(guard);

        assert!(output.exists());
    }
}
