//! Inference engine abstraction
//!
//! The process holds exactly one [`Engine`], built at startup by
//! [`load_engine`] and shared behind the pipeline's gate. Engines are blocking
//! and are only ever called from the inference workers.

use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::audio::SAMPLE_RATE;
use crate::config::EngineConfig;
use crate::transcript::{Segment, TranscriptionResult, Word, WordDetail};
use crate::vad::{self, SpeechDetector, SpeechTimestampMap, VadConfig, VadError};

#[cfg(test)]
pub(crate) mod testing;
#[cfg(feature = "whisper")]
pub mod whisper;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No inference backend available, rebuild with the `whisper` feature")]
    Unavailable,

    #[error("Failed to load model {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Vad(#[from] VadError),
}

/// Raw engine output, timed relative to the samples the engine was given
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub language_probability: f32,
}

/// A loaded speech-to-text model
///
/// Implementations may assume they are never called concurrently.
pub trait Engine: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Transcribe 16 kHz mono samples in `[-1, 1]`
    fn transcribe(&self, samples: &[f32]) -> Result<EngineOutput, EngineError>;

    /// Drop caches grown by previous calls
    fn release_caches(&self) {}
}

/// VAD settings for one job, with the detector scoring its audio
pub struct VadPass<'a> {
    pub config: &'a VadConfig,
    pub detector: &'a mut dyn SpeechDetector,
}

/// Run one transcription, applying VAD when configured
///
/// With VAD the engine only sees the detected speech, glued together, and
/// the resulting timestamps are mapped back onto `samples`. When no speech is
/// found the engine is not called at all.
pub fn invoke(
    engine: &dyn Engine,
    samples: &[f32],
    vad: Option<VadPass<'_>>,
) -> Result<TranscriptionResult, EngineError> {
    let duration = samples.len() as f64 / SAMPLE_RATE as f64;

    let Some(VadPass { config, detector }) = vad else {
        let output = engine.transcribe(samples)?;
        return Ok(TranscriptionResult::new(
            output.segments,
            output.language,
            output.language_probability,
            duration,
        ));
    };

    let chunks = vad::speech_chunks(detector, samples, config);
    if chunks.is_empty() {
        debug!("No speech detected in {:.2}s of audio", duration);
        return Ok(TranscriptionResult::empty(duration));
    }

    let speech = vad::collect_chunks(samples, &chunks);
    debug!(
        "VAD kept {:.2}s of {:.2}s in {} region(s)",
        speech.len() as f64 / SAMPLE_RATE as f64,
        duration,
        chunks.len()
    );

    let output = engine.transcribe(&speech)?;
    let map = SpeechTimestampMap::new(&chunks);
    let segments = output
        .segments
        .into_iter()
        .map(|segment| restore_segment(segment, &map))
        .collect();

    Ok(TranscriptionResult::new(
        segments,
        output.language,
        output.language_probability,
        duration,
    ))
}

fn restore_segment(segment: Segment, map: &SpeechTimestampMap) -> Segment {
    let words = match segment.words {
        WordDetail::Available(words) => WordDetail::Available(
            words
                .into_iter()
                .map(|word| Word {
                    start: map.original_time(word.start, false),
                    end: map.original_time(word.end, true),
                    ..word
                })
                .collect(),
        ),
        WordDetail::Unavailable => WordDetail::Unavailable,
    };

    Segment {
        start: map.original_time(segment.start, false),
        end: map.original_time(segment.end, true),
        text: segment.text,
        words,
    }
}

/// Build the configured engine
pub fn load_engine(config: &EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
    info!(
        "Loading engine: model={}, device={}:{}",
        config.model_path, config.device, config.device_index
    );
    build_backend(config)
}

#[cfg(feature = "whisper")]
fn build_backend(config: &EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
    let engine = whisper::WhisperEngine::load(config)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "whisper"))]
fn build_backend(_config: &EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
    Err(EngineError::Unavailable)
}
