use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{assert_gate_free, config, pcm, pipeline};
use crate::engine::testing::energy_factory;
use crate::engine::testing::StubEngine;
use crate::file_utils::list_files;
use crate::pipeline::{AudioJob, PipelineError, Transcription};
use crate::vad::{DetectorFactory, VadConfig, VadError};

/// Fake transcoder that copies `wav` to its last argument
#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, wav: &[u8]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let fixture = dir.join("fixture.wav");
    std::fs::write(&fixture, wav).unwrap();

    let script = dir.join("fake-ffmpeg.sh");
    let body = format!(
        "#!/bin/sh\nfor last; do :; done\ncp '{}' \"$last\"\n",
        fixture.display()
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn canonical_wav(value: i16, seconds: f64) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..(seconds * 16_000.0) as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(unix)]
#[tokio::test]
async fn uploaded_file_is_transcoded_and_cleaned_up() {
    let scratch = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let mut config = config(scratch.path());
    config.ffmpeg_command = fake_ffmpeg(tools.path(), &canonical_wav(8192, 1.0))
        .display()
        .to_string();

    let engine = Arc::new(StubEngine::new());
    let pipeline = pipeline(&config, &engine);

    let result = pipeline
        .run(AudioJob::container(b"any container bytes", None, false))
        .await
        .unwrap();

    assert_eq!(result, Transcription::Plain("level 25".to_string()));
    assert_eq!(engine.releases(), 1);
    assert!(list_files(scratch.path()).unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_upload_fails_before_the_engine() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let job = AudioJob::container(b"definitely not audio", None, false);
    let job_id = job.id.clone();
    let err = pipeline.run(job).await.unwrap_err();

    assert!(matches!(err, PipelineError::DecodeFailed { .. }));
    assert_eq!(err.job_id(), job_id);
    assert_eq!(engine.calls(), 0);
    assert!(list_files(scratch.path()).unwrap().is_empty());
    assert_gate_free(&pipeline).await;
}

#[tokio::test]
async fn odd_length_pcm_is_a_decode_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let err = pipeline
        .run(AudioJob::pcm(&[1, 2, 3], None, false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "decode_failed");
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn engine_failure_still_reclaims() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new().failing());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let bytes = pcm(20, 0.5);
    let err = pipeline.run(AudioJob::pcm(&bytes, None, false)).await.unwrap_err();

    assert!(matches!(err, PipelineError::EngineFailure { .. }));
    assert_eq!(engine.releases(), 1);
    assert_gate_free(&pipeline).await;
}

#[tokio::test]
async fn engine_panic_still_reclaims() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new().panicking());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let bytes = pcm(20, 0.5);
    let err = pipeline.run(AudioJob::pcm(&bytes, None, false)).await.unwrap_err();

    match err {
        PipelineError::EngineFailure { reason, .. } => assert!(reason.contains("panicked")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(engine.releases(), 1);
    assert_gate_free(&pipeline).await;

    // the worker survived the panic
    let healthy = Arc::new(StubEngine::new());
    let pipeline = super::pipeline(&config(scratch.path()), &healthy);
    assert!(pipeline.run(AudioJob::pcm(&bytes, None, false)).await.is_ok());
}

#[tokio::test]
async fn expired_deadline_reclaims_once_inference_ends() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = config(scratch.path());
    config.request_deadline = Some(Duration::from_millis(50));
    let engine = Arc::new(StubEngine::new().with_delay(Duration::from_millis(300)));
    let pipeline = pipeline(&config, &engine);

    let bytes = pcm(30, 0.5);
    let err = pipeline.run(AudioJob::pcm(&bytes, None, false)).await.unwrap_err();
    assert!(matches!(err, PipelineError::DeadlineExceeded { .. }));

    // inference is not interrupted, it finishes and then lets go of the engine
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.calls(), 1);
    assert_eq!(engine.releases(), 1);
    assert_gate_free(&pipeline).await;
}

#[tokio::test]
async fn silence_with_vad_skips_the_engine() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let silence = vec![0u8; 32_000];
    let result = pipeline
        .run(AudioJob::pcm(&silence, Some(VadConfig::default()), true))
        .await
        .unwrap();

    let Transcription::Detailed(detailed) = result else {
        panic!("expected a detailed transcription");
    };
    assert_eq!(detailed.full_text, "");
    assert_eq!(detailed.language, None);
    assert!(detailed.segments.is_empty());
    assert!((detailed.duration - 1.0).abs() < 1e-9);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn reclaim_interval_zero_never_releases_caches() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = config(scratch.path());
    config.reclaim_interval = 0;
    let engine = Arc::new(StubEngine::new());
    let pipeline = pipeline(&config, &engine);

    let bytes = pcm(10, 0.1);
    for _ in 0..3 {
        pipeline.run(AudioJob::pcm(&bytes, None, false)).await.unwrap();
    }
    assert_eq!(engine.calls(), 3);
    assert_eq!(engine.releases(), 0);
}

#[tokio::test]
async fn same_audio_gives_the_same_detailed_result() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new().with_words());
    let pipeline = pipeline(&config(scratch.path()), &engine);

    let mut bytes = vec![0u8; 64_000];
    bytes.extend(pcm(30, 1.0));
    bytes.extend(vec![0u8; 96_000]);
    bytes.extend(pcm(60, 0.5));

    let config = VadConfig {
        min_silence_duration_ms: 500.0,
        ..VadConfig::default()
    };
    let first = pipeline
        .run(AudioJob::pcm(&bytes, Some(config.clone()), true))
        .await
        .unwrap();
    let second = pipeline
        .run(AudioJob::pcm(&bytes, Some(config), true))
        .await
        .unwrap();

    let (Transcription::Detailed(first), Transcription::Detailed(second)) = (first, second) else {
        panic!("expected detailed transcriptions");
    };
    assert!(!first.segments.is_empty());
    assert_eq!(first, second);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn detector_failure_is_an_engine_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::new());
    let broken: DetectorFactory =
        Arc::new(|| Err(VadError::InitializationFailed("no model".to_string())));
    let pipeline = pipeline(&config(scratch.path()), &engine).with_detector(broken);

    let bytes = pcm(20, 0.5);
    let err = pipeline
        .run(AudioJob::pcm(&bytes, Some(VadConfig::default()), false))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EngineFailure { .. }));
    assert_eq!(engine.calls(), 0);
    assert_gate_free(&pipeline).await;

    // jobs without VAD never build a detector
    let pipeline = pipeline.with_detector(energy_factory());
    assert!(pipeline.run(AudioJob::pcm(&bytes, None, false)).await.is_ok());
}
