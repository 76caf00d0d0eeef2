use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use hifigrab_core::clock::ManualClock;
use hifigrab_core::convert::{PipelineState, ToolKind};
use hifigrab_core::testing::{FakeToolchain, ToolBehavior};
use hifigrab_core::{
    ConversionPipeline, ConversionRequest, EnhanceOptions, FailureKind, HifigrabConfig,
    TargetFormat,
};

const SOURCE: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

fn request(format: TargetFormat, include_video: bool) -> ConversionRequest {
    ConversionRequest {
        source_url: SOURCE.to_string(),
        format,
        include_video,
        enhance: EnhanceOptions::default(),
    }
}

fn pipeline(dir: &Path, tools: &Arc<FakeToolchain>) -> ConversionPipeline {
    ConversionPipeline::new(&HifigrabConfig::default(), dir, tools.clone())
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn flac_conversion_leaves_only_the_final_file() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new());

    let outcome = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::Flac, false))
        .await
        .unwrap();

    assert_eq!(outcome.output_path, dir.path().join("Fake_Artist_-_Fake_Song.flac"));
    assert_eq!(outcome.title, "Fake_Artist_-_Fake_Song");
    assert_eq!(outcome.media_id.as_str(), "dQw4w9WgXcQ");
    assert_eq!(outcome.message(), "FLAC saved using video title");
    assert_eq!(outcome.before.sample_rate_hz, Some(384_000));
    assert_eq!(entries(dir.path()), ["Fake_Artist_-_Fake_Song.flac"]);

    assert_eq!(tools.count(ToolKind::Acquisition), 2);
    assert_eq!(tools.count(ToolKind::Transcoder), 1);
    assert_eq!(tools.count(ToolKind::Prober), 2);

    let encode = tools
        .invocations()
        .into_iter()
        .find(|invocation| invocation.tool == ToolKind::Transcoder)
        .unwrap();
    let args = encode.args.join(" ");
    assert!(args.contains("-c:a flac"));
    assert!(args.contains("equalizer=f=60:t=q:w=1.5:g=4"), "{args}");
}

#[tokio::test(start_paused = true)]
async fn hung_acquisition_times_out_and_cleans_up() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new().with_behavior(ToolKind::Acquisition, ToolBehavior::Hang));

    let err = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::Flac, false))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::AcquisitionFailure);
    assert!(entries(dir.path()).is_empty());
    assert_eq!(tools.count(ToolKind::Transcoder), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_conversion_removes_temporaries() {
    let dir = tempdir().unwrap();
    let tools =
        Arc::new(FakeToolchain::new().with_behavior(ToolKind::Transcoder, ToolBehavior::Hang));
    let pipeline = pipeline(dir.path(), &tools);

    let elapsed = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.convert(request(TargetFormat::Flac, false)),
    )
    .await;

    assert!(elapsed.is_err());
    assert_eq!(tools.count(ToolKind::Transcoder), 1);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn failed_encode_removes_partial_output() {
    let dir = tempdir().unwrap();
    let stderr = "Error while filtering: Invalid argument";
    let tools = Arc::new(FakeToolchain::new().with_behavior(
        ToolKind::Transcoder,
        ToolBehavior::WriteThenFail(stderr.to_string()),
    ));

    let err = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::Wav, false))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::EncodingFailure);
    assert_eq!(err.details(), stderr);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn video_conversion_muxes_enhanced_audio() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new());

    let outcome = pipeline(dir.path(), &tools)
        .convert(ConversionRequest {
            enhance: EnhanceOptions {
                reverb: true,
                widening: false,
            },
            ..request(TargetFormat::Mp4, true)
        })
        .await
        .unwrap();

    assert_eq!(outcome.output_path, dir.path().join("Fake_Artist_-_Fake_Song.mp4"));
    assert_eq!(entries(dir.path()), ["Fake_Artist_-_Fake_Song.mp4"]);
    assert_eq!(tools.count(ToolKind::Transcoder), 3);

    let transcodes: Vec<_> = tools
        .invocations()
        .into_iter()
        .filter(|invocation| invocation.tool == ToolKind::Transcoder)
        .collect();
    assert!(transcodes[1].args.join(" ").contains("aecho="));
    assert!(transcodes[2].args.join(" ").contains("-map 0:v:0 -map 1:a:0"));
}

#[tokio::test]
async fn failed_title_lookup_falls_back_to_timestamp() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new().with_title(None));
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let pipeline = ConversionPipeline::with_clock(
        &HifigrabConfig::default(),
        dir.path(),
        tools.clone(),
        Arc::new(ManualClock::new(now)),
    );

    let outcome = pipeline
        .convert(request(TargetFormat::Mp3, false))
        .await
        .unwrap();

    let expected = format!("converted_{}", now.timestamp_millis());
    assert_eq!(outcome.title, expected);
    assert_eq!(outcome.output_path, dir.path().join(format!("{expected}.mp3")));
}

#[tokio::test]
async fn existing_output_gets_a_suffix() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("Fake_Artist_-_Fake_Song.m4a"), b"older").unwrap();
    let tools = Arc::new(FakeToolchain::new());

    let outcome = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::M4a, false))
        .await
        .unwrap();

    assert_eq!(outcome.output_path, dir.path().join("Fake_Artist_-_Fake_Song_1.m4a"));
    assert_eq!(
        std::fs::read(dir.path().join("Fake_Artist_-_Fake_Song.m4a")).unwrap(),
        b"older"
    );
}

#[tokio::test]
async fn unsupported_url_is_rejected_before_any_tool_runs() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new());

    let err = pipeline(dir.path(), &tools)
        .convert(ConversionRequest {
            source_url: "https://vimeo.com/12345".into(),
            ..request(TargetFormat::Flac, false)
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::InvalidInput);
    assert_eq!(err.received_url(), Some("https://vimeo.com/12345"));
    assert!(tools.invocations().is_empty());
}

#[tokio::test]
async fn missing_encoder_output_is_a_probe_failure() {
    let dir = tempdir().unwrap();
    let tools =
        Arc::new(FakeToolchain::new().with_behavior(ToolKind::Transcoder, ToolBehavior::NoOutput));

    let err = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::Flac, false))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::ProbeFailure);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn probe_failures_are_not_fatal() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(
        FakeToolchain::new().with_behavior(ToolKind::Prober, ToolBehavior::Fail("boom".into())),
    );

    let outcome = pipeline(dir.path(), &tools)
        .convert(request(TargetFormat::Wav, false))
        .await
        .unwrap();

    assert!(outcome.before.is_unknown());
    assert!(outcome.after.is_unknown());
    assert_eq!(entries(dir.path()), ["Fake_Artist_-_Fake_Song.wav"]);
}

#[tokio::test]
async fn stepping_exposes_each_stage_cleanup_set() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeToolchain::new());
    let pipeline = pipeline(dir.path(), &tools);

    let state = pipeline
        .step(PipelineState::Resolving(request(TargetFormat::Flac, true)))
        .await;
    assert!(matches!(state, PipelineState::Acquiring(_)));
    let mut cleanup = state.cleanup_set();
    cleanup.sort();
    let mut expected = vec![
        dir.path().join("Fake_Artist_-_Fake_Song_temp.wav"),
        dir.path().join("Fake_Artist_-_Fake_Song_temp_video.mp4"),
        dir.path().join("Fake_Artist_-_Fake_Song.flac"),
    ];
    expected.sort();
    assert_eq!(cleanup, expected);

    let mut state = pipeline.step(state).await;
    assert!(matches!(state, PipelineState::ProbingBefore(_)));
    while !state.is_terminal() {
        state = pipeline.step(state).await;
    }
    assert!(matches!(state, PipelineState::Done(_)));
    assert_eq!(entries(dir.path()), ["Fake_Artist_-_Fake_Song.flac"]);
}
