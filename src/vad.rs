//! Voice activity detection
//!
//! Speech regions are found from per-window speech probabilities and the
//! region rules of [`VadConfig`]. Probabilities come from a [`SpeechDetector`],
//! in production the Silero model. The transcription then only sees the speech
//! regions glued together, and [`SpeechTimestampMap`] maps the engine's
//! timestamps back onto the original audio.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use voice_activity_detector::VoiceActivityDetector;

use crate::audio::SAMPLE_RATE;

/// Samples per probability window (32 ms at 16 kHz)
pub const WINDOW_SIZE_SAMPLES: usize = 512;

// A pause this long inside an over-long region is remembered as a split point
const MIN_SILENCE_AT_MAX_SPEECH_MS: f64 = 98.0;

/// Upper bound on the length of a single speech region
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechLimit {
    /// Regions are never split for length
    Unbounded,
    /// Regions longer than this many seconds are split
    Seconds(f64),
}

impl fmt::Display for SpeechLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechLimit::Unbounded => write!(f, "unbounded"),
            SpeechLimit::Seconds(s) => write!(f, "{}s", s),
        }
    }
}

/// Speech/silence segmentation settings
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Speech probability cutoff in `[0, 1]`
    pub threshold: f32,
    /// Regions shorter than this are dropped
    pub min_speech_duration_ms: f64,
    pub max_speech_duration: SpeechLimit,
    /// Silence needed before a region is closed
    pub min_silence_duration_ms: f64,
    /// Padding added on both sides of each region
    pub speech_pad_ms: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 250.0,
            max_speech_duration: SpeechLimit::Unbounded,
            min_silence_duration_ms: 2000.0,
            speech_pad_ms: 400.0,
        }
    }
}

/// A VAD query value that could not be turned into a setting
#[derive(Debug, Error, PartialEq)]
#[error("Failed to convert VAD parameter '{name}' (value: '{value}'): {reason}")]
pub struct VadParamError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

/// Raw VAD settings as received from a client, before conversion
#[derive(Debug, Default, Clone)]
pub struct VadParams<'a> {
    pub threshold: Option<&'a str>,
    pub min_speech: Option<&'a str>,
    pub max_speech: Option<&'a str>,
    pub min_silence: Option<&'a str>,
    pub speech_pad: Option<&'a str>,
}

fn parse_non_negative(name: &'static str, raw: &str) -> Result<f64, VadParamError> {
    let error = |reason: String| VadParamError {
        name,
        value: raw.to_string(),
        reason,
    };

    let value: f64 = raw.trim().parse().map_err(|e| error(format!("{}", e)))?;
    if value.is_nan() {
        return Err(error("not a number".to_string()));
    }
    if value < 0.0 {
        return Err(error("must not be negative".to_string()));
    }
    Ok(value)
}

impl VadConfig {
    /// Convert raw client values, falling back to the defaults for absent ones
    pub fn from_params(params: &VadParams<'_>) -> Result<Self, VadParamError> {
        let mut config = VadConfig::default();

        if let Some(raw) = params.threshold {
            let threshold = parse_non_negative("vad_threshold", raw)?;
            if threshold > 1.0 {
                return Err(VadParamError {
                    name: "vad_threshold",
                    value: raw.to_string(),
                    reason: "must be between 0 and 1".to_string(),
                });
            }
            config.threshold = threshold as f32;
        }
        if let Some(raw) = params.min_speech {
            config.min_speech_duration_ms = finite("vad_min_speech", raw)?;
        }
        if let Some(raw) = params.max_speech {
            let seconds = parse_non_negative("vad_max_speech", raw)?;
            config.max_speech_duration = if seconds.is_infinite() {
                SpeechLimit::Unbounded
            } else {
                SpeechLimit::Seconds(seconds)
            };
        }
        if let Some(raw) = params.min_silence {
            config.min_silence_duration_ms = finite("vad_min_silence", raw)?;
        }
        if let Some(raw) = params.speech_pad {
            config.speech_pad_ms = finite("vad_speech_pad", raw)?;
        }

        Ok(config)
    }
}

fn finite(name: &'static str, raw: &str) -> Result<f64, VadParamError> {
    let value = parse_non_negative(name, raw)?;
    if value.is_infinite() {
        return Err(VadParamError {
            name,
            value: raw.to_string(),
            reason: "must be finite".to_string(),
        });
    }
    Ok(value)
}

/// A speech region in samples, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechChunk {
    pub start: usize,
    pub end: usize,
}

impl SpeechChunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VadError {
    #[error("VAD initialization failed: {0}")]
    InitializationFailed(String),
}

/// Source of per-window speech probabilities
///
/// Detectors are stateful: windows must be fed in order, one audio buffer per
/// detector.
pub trait SpeechDetector {
    /// Speech probability in `[0, 1]` of one window of
    /// [`WINDOW_SIZE_SAMPLES`] samples
    fn speech_probability(&mut self, window: &[f32]) -> f32;
}

/// Builds a fresh detector for each audio buffer
pub type DetectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn SpeechDetector>, VadError> + Send + Sync>;

/// Silero speech model at 16 kHz
pub struct SileroDetector {
    vad: VoiceActivityDetector,
}

impl SileroDetector {
    pub fn new() -> Result<Self, VadError> {
        let vad = VoiceActivityDetector::builder()
            .sample_rate(SAMPLE_RATE as i32)
            .chunk_size(WINDOW_SIZE_SAMPLES)
            .build()
            .map_err(|e| VadError::InitializationFailed(e.to_string()))?;
        Ok(Self { vad })
    }
}

impl SpeechDetector for SileroDetector {
    fn speech_probability(&mut self, window: &[f32]) -> f32 {
        let mut chunk = window.to_vec();
        chunk.resize(WINDOW_SIZE_SAMPLES, 0.0);
        self.vad.predict(chunk)
    }
}

/// Factory for [`SileroDetector`]
pub fn silero_factory() -> DetectorFactory {
    Arc::new(|| Ok(Box::new(SileroDetector::new()?) as Box<dyn SpeechDetector>))
}

fn ms_to_samples(ms: f64) -> usize {
    (SAMPLE_RATE as f64 * ms / 1000.0) as usize
}

/// Find the speech regions of `audio` (16 kHz mono)
pub fn speech_chunks(
    detector: &mut dyn SpeechDetector,
    audio: &[f32],
    config: &VadConfig,
) -> Vec<SpeechChunk> {
    let probabilities: Vec<f32> = audio
        .chunks(WINDOW_SIZE_SAMPLES)
        .map(|window| detector.speech_probability(window))
        .collect();
    chunks_from_probabilities(&probabilities, audio.len(), config)
}

/// Speech regions from one probability per window of `audio_len` samples
pub fn chunks_from_probabilities(
    probabilities: &[f32],
    audio_len: usize,
    config: &VadConfig,
) -> Vec<SpeechChunk> {
    let window = WINDOW_SIZE_SAMPLES;

    let min_speech_samples = ms_to_samples(config.min_speech_duration_ms);
    let speech_pad_samples = ms_to_samples(config.speech_pad_ms);
    let min_silence_samples = ms_to_samples(config.min_silence_duration_ms);
    let min_silence_samples_at_max_speech = ms_to_samples(MIN_SILENCE_AT_MAX_SPEECH_MS);
    let max_speech_samples = match config.max_speech_duration {
        SpeechLimit::Unbounded => usize::MAX,
        SpeechLimit::Seconds(s) => {
            let raw = SAMPLE_RATE as f64 * s - window as f64 - 2.0 * speech_pad_samples as f64;
            raw.max(window as f64) as usize
        }
    };

    let threshold = config.threshold;
    let neg_threshold = (threshold - 0.15).max(0.01);

    let mut speeches: Vec<SpeechChunk> = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut temp_end = 0usize;
    let mut prev_end = 0usize;
    let mut next_start = 0usize;

    for (i, &probability) in probabilities.iter().enumerate() {
        let position = window * i;

        if probability >= threshold && temp_end != 0 {
            temp_end = 0;
            if next_start < prev_end {
                next_start = position;
            }
        }

        let Some(start) = current_start else {
            if probability >= threshold {
                current_start = Some(position);
            }
            continue;
        };

        if position - start > max_speech_samples {
            if prev_end != 0 {
                speeches.push(SpeechChunk {
                    start,
                    end: prev_end,
                });
                current_start = if next_start < prev_end {
                    None
                } else {
                    Some(next_start)
                };
            } else {
                speeches.push(SpeechChunk {
                    start,
                    end: position,
                });
                current_start = None;
            }
            prev_end = 0;
            next_start = 0;
            temp_end = 0;
            continue;
        }

        if probability < neg_threshold {
            if temp_end == 0 {
                temp_end = position;
            }
            if position - temp_end > min_silence_samples_at_max_speech {
                prev_end = temp_end;
            }
            if position - temp_end < min_silence_samples {
                continue;
            }
            if temp_end - start > min_speech_samples {
                speeches.push(SpeechChunk {
                    start,
                    end: temp_end,
                });
            }
            current_start = None;
            prev_end = 0;
            next_start = 0;
            temp_end = 0;
        }
    }

    if let Some(start) = current_start {
        if audio_len - start > min_speech_samples {
            speeches.push(SpeechChunk {
                start,
                end: audio_len,
            });
        }
    }

    pad_chunks(&mut speeches, speech_pad_samples, audio_len);
    speeches
}

/// Widen regions by `pad`, splitting short gaps between neighbours evenly
fn pad_chunks(speeches: &mut [SpeechChunk], pad: usize, audio_len: usize) {
    let count = speeches.len();
    for i in 0..count {
        if i == 0 {
            speeches[i].start = speeches[i].start.saturating_sub(pad);
        }
        if i + 1 < count {
            let silence = speeches[i + 1].start.saturating_sub(speeches[i].end);
            if silence < 2 * pad {
                speeches[i].end += silence / 2;
                speeches[i + 1].start = speeches[i + 1].start.saturating_sub(silence / 2);
            } else {
                speeches[i].end = (speeches[i].end + pad).min(audio_len);
                speeches[i + 1].start = speeches[i + 1].start.saturating_sub(pad);
            }
        } else {
            speeches[i].end = (speeches[i].end + pad).min(audio_len);
        }
    }
}

/// Concatenate the speech regions of `audio`
pub fn collect_chunks(audio: &[f32], chunks: &[SpeechChunk]) -> Vec<f32> {
    let total: usize = chunks.iter().map(SpeechChunk::len).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(&audio[chunk.start..chunk.end.min(audio.len())]);
    }
    out
}

/// Maps times in the concatenated speech back to the original audio
#[derive(Debug, Clone)]
pub struct SpeechTimestampMap {
    /// End of each chunk, in samples of the concatenated audio
    chunk_end_sample: Vec<usize>,
    /// Silence removed before each chunk, in samples
    total_silence_before: Vec<usize>,
}

impl SpeechTimestampMap {
    pub fn new(chunks: &[SpeechChunk]) -> Self {
        let mut chunk_end_sample = Vec::with_capacity(chunks.len());
        let mut total_silence_before = Vec::with_capacity(chunks.len());
        let mut previous_end = 0usize;
        let mut silent_samples = 0usize;

        for chunk in chunks {
            silent_samples += chunk.start.saturating_sub(previous_end);
            previous_end = chunk.end;

            chunk_end_sample.push(chunk.end - silent_samples);
            total_silence_before.push(silent_samples);
        }

        Self {
            chunk_end_sample,
            total_silence_before,
        }
    }

    fn chunk_index(&self, sample: usize, is_end: bool) -> usize {
        let last = self.chunk_end_sample.len().saturating_sub(1);
        self.chunk_end_sample
            .iter()
            .position(|&end| if is_end { end >= sample } else { end > sample })
            .unwrap_or(last)
    }

    /// Original time of `time` (seconds in the concatenated speech)
    ///
    /// `is_end` attributes a time falling exactly on a chunk boundary to the
    /// chunk that ends there rather than the one that starts there.
    pub fn original_time(&self, time: f64, is_end: bool) -> f64 {
        if self.chunk_end_sample.is_empty() {
            return time;
        }
        let sample = (time.max(0.0) * SAMPLE_RATE as f64).round() as usize;
        let index = self.chunk_index(sample, is_end);
        time + self.total_silence_before[index] as f64 / SAMPLE_RATE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::EnergyDetector;

    fn chunks(audio: &[f32], config: &VadConfig) -> Vec<SpeechChunk> {
        speech_chunks(&mut EnergyDetector, audio, config)
    }

    fn silence(seconds: f64) -> Vec<f32> {
        vec![0.0; (seconds * SAMPLE_RATE as f64) as usize]
    }

    fn tone(seconds: f64) -> Vec<f32> {
        let n = (seconds * SAMPLE_RATE as f64) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn defaults_match_the_public_contract() {
        let config = VadConfig::default();
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.min_speech_duration_ms, 250.0);
        assert_eq!(config.max_speech_duration, SpeechLimit::Unbounded);
        assert_eq!(config.min_silence_duration_ms, 2000.0);
        assert_eq!(config.speech_pad_ms, 400.0);
    }

    #[test]
    fn non_numeric_threshold_is_rejected() {
        let err = VadConfig::from_params(&VadParams {
            threshold: Some("notanumber"),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.name, "vad_threshold");
        assert!(err.to_string().contains("Failed to convert VAD parameter"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(VadConfig::from_params(&VadParams {
            threshold: Some("1.5"),
            ..Default::default()
        })
        .is_err());
        assert!(VadConfig::from_params(&VadParams {
            min_silence: Some("-1"),
            ..Default::default()
        })
        .is_err());
        assert!(VadConfig::from_params(&VadParams {
            speech_pad: Some("inf"),
            ..Default::default()
        })
        .is_err());
        assert!(VadConfig::from_params(&VadParams {
            min_speech: Some("NaN"),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn max_speech_accepts_infinity_as_unbounded() {
        let config = VadConfig::from_params(&VadParams {
            max_speech: Some("inf"),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.max_speech_duration, SpeechLimit::Unbounded);

        let config = VadConfig::from_params(&VadParams {
            max_speech: Some("30"),
            threshold: Some("0.35"),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.max_speech_duration, SpeechLimit::Seconds(30.0));
        assert!((config.threshold - 0.35).abs() < f32::EPSILON);
    }

    #[test]
    fn silence_has_no_speech() {
        let mut detector = SileroDetector::new().unwrap();
        assert!(speech_chunks(&mut detector, &silence(3.0), &VadConfig::default()).is_empty());
        assert!(speech_chunks(&mut detector, &[], &VadConfig::default()).is_empty());
    }

    #[test]
    fn steady_offset_is_not_speech() {
        let mut detector = SileroDetector::new().unwrap();
        let audio = vec![0.05f32; 48_000];
        assert!(speech_chunks(&mut detector, &audio, &VadConfig::default()).is_empty());
    }

    #[test]
    fn partial_last_window_is_scored() {
        let mut detector = SileroDetector::new().unwrap();
        let probability = detector.speech_probability(&[0.0; 100]);
        assert!((0.0..=1.0).contains(&probability));
    }

    #[test]
    fn one_probability_per_window() {
        let probabilities = [1.0; 10];
        let config = VadConfig {
            min_speech_duration_ms: 0.0,
            speech_pad_ms: 0.0,
            ..VadConfig::default()
        };
        let found = chunks_from_probabilities(&probabilities, 10 * WINDOW_SIZE_SAMPLES, &config);
        assert_eq!(
            found,
            vec![SpeechChunk {
                start: 0,
                end: 10 * WINDOW_SIZE_SAMPLES
            }]
        );
    }

    #[test]
    fn tone_burst_is_found_with_padding() {
        let mut audio = silence(1.0);
        audio.extend(tone(1.0));
        audio.extend(silence(1.0));

        let config = VadConfig {
            min_silence_duration_ms: 300.0,
            ..VadConfig::default()
        };
        let chunks = chunks(&audio, &config);
        assert_eq!(chunks.len(), 1);

        let pad = ms_to_samples(config.speech_pad_ms);
        let chunk = chunks[0];
        assert!(chunk.start < 16_000 && chunk.start + pad + WINDOW_SIZE_SAMPLES >= 16_000);
        assert!(chunk.end > 32_000 && chunk.end <= 32_000 + pad + WINDOW_SIZE_SAMPLES);
    }

    #[test]
    fn short_blips_are_dropped() {
        let mut audio = silence(1.0);
        audio.extend(tone(0.05));
        audio.extend(silence(3.0));

        let config = VadConfig {
            min_silence_duration_ms: 300.0,
            ..VadConfig::default()
        };
        assert!(chunks(&audio, &config).is_empty());
    }

    #[test]
    fn long_speech_is_split_at_the_limit() {
        let audio = tone(20.0);
        let config = VadConfig {
            max_speech_duration: SpeechLimit::Seconds(5.0),
            speech_pad_ms: 0.0,
            min_silence_duration_ms: 100.0,
            ..VadConfig::default()
        };
        let chunks = chunks(&audio, &config);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= 5 * SAMPLE_RATE as usize));
        assert!(chunks.windows(2).all(|w| w[0].end <= w[1].start));
    }

    #[test]
    fn timestamps_map_back_across_removed_silence() {
        let chunks = [
            SpeechChunk {
                start: 16_000,
                end: 32_000,
            },
            SpeechChunk {
                start: 48_000,
                end: 64_000,
            },
        ];
        let map = SpeechTimestampMap::new(&chunks);

        assert!((map.original_time(0.5, false) - 1.5).abs() < 1e-9);
        assert!((map.original_time(1.0, true) - 2.0).abs() < 1e-9);
        assert!((map.original_time(1.0, false) - 3.0).abs() < 1e-9);
        assert!((map.original_time(1.5, false) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn collect_concatenates_regions() {
        let audio: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let chunks = [
            SpeechChunk { start: 1, end: 3 },
            SpeechChunk { start: 6, end: 8 },
        ];
        assert_eq!(collect_chunks(&audio, &chunks), vec![1.0, 2.0, 6.0, 7.0]);
    }
}
