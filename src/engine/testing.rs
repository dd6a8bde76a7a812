//! Instrumented engine for tests
//!
//! Output text is derived from the input so concurrent callers can check they
//! got their own result back: a buffer with mean absolute amplitude 0.25
//! transcribes to `"level 25"`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Engine, EngineError, EngineOutput};
use crate::audio::SAMPLE_RATE;
use crate::transcript::{Segment, Word, WordDetail};
use crate::vad::{DetectorFactory, SpeechDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

#[derive(Debug)]
pub(crate) struct StubEngine {
    behavior: Behavior,
    delay: Duration,
    words: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    releases: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl StubEngine {
    pub(crate) fn new() -> Self {
        Self {
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            words: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Block each call for `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report word timings
    pub(crate) fn with_words(mut self) -> Self {
        self.words = true;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    pub(crate) fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Largest number of calls ever observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Texts of the calls in the order they started
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

/// Text the stub produces for `samples`
pub(crate) fn level_text(samples: &[f32]) -> String {
    let mean = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
    };
    format!("level {}", (mean * 100.0).round() as i64)
}

impl Engine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn transcribe(&self, samples: &[f32]) -> Result<EngineOutput, EngineError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let text = level_text(samples);
        if let Ok(mut log) = self.log.lock() {
            log.push(text.clone());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Fail => return Err(EngineError::Inference("stub failure".to_string())),
            Behavior::Panic => panic!("stub engine panicked"),
            Behavior::Succeed => {}
        }

        let duration = samples.len() as f64 / SAMPLE_RATE as f64;
        let words = if self.words {
            let mut parts = text.split(' ');
            let first = parts.next().unwrap_or_default();
            let second = parts.next().unwrap_or_default();
            WordDetail::Available(vec![
                Word {
                    start: 0.0,
                    end: duration / 2.0,
                    text: format!(" {}", first),
                    probability: 0.9,
                },
                Word {
                    start: duration / 2.0,
                    end: duration,
                    text: format!(" {}", second),
                    probability: 0.8,
                },
            ])
        } else {
            WordDetail::Unavailable
        };

        Ok(EngineOutput {
            segments: vec![Segment {
                start: 0.0,
                end: duration,
                text: format!(" {} ", text),
                words,
            }],
            language: Some("en".to_string()),
            language_probability: 0.99,
        })
    }

    fn release_caches(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Treats any window louder than 0.01 mean absolute amplitude as speech
#[derive(Debug, Default)]
pub(crate) struct EnergyDetector;

impl SpeechDetector for EnergyDetector {
    fn speech_probability(&mut self, window: &[f32]) -> f32 {
        let mean = window.iter().map(|s| s.abs()).sum::<f32>() / window.len().max(1) as f32;
        if mean > 0.01 {
            1.0
        } else {
            0.0
        }
    }
}

pub(crate) fn energy_factory() -> DetectorFactory {
    Arc::new(|| Ok(Box::new(EnergyDetector) as Box<dyn SpeechDetector>))
}
