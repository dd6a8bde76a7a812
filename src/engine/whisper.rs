//! whisper.cpp backend

use std::sync::Mutex;

use log::{debug, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperSegment,
    WhisperState,
};

use super::{Engine, EngineError, EngineOutput};
use crate::config::{Device, EngineConfig};
use crate::transcript::{Segment, Word, WordDetail};

// whisper.cpp timestamps are in centiseconds
const TIMESTAMP_SCALE: f64 = 100.0;

pub struct WhisperEngine {
    ctx: WhisperContext,
    /// Decoder state kept between calls, rebuilt after `release_caches`
    state: Mutex<Option<WhisperState>>,
    language: Option<String>,
    threads: usize,
    beam_size: u32,
}

impl WhisperEngine {
    /// Load the model described by `config`
    pub fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let use_gpu = match config.device {
            Device::Cpu => false,
            Device::Cuda | Device::Auto => true,
        };

        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu).gpu_device(config.device_index as i32);

        let ctx = WhisperContext::new_with_params(&config.model_path, params).map_err(|e| {
            EngineError::Load {
                path: config.model_path.clone(),
                reason: e.to_string(),
            }
        })?;

        info!(
            "Whisper model loaded from {} (gpu: {}, threads: {})",
            config.model_path,
            use_gpu,
            config.effective_threads()
        );

        Ok(Self {
            ctx,
            state: Mutex::new(None),
            language: config.language.clone(),
            threads: config.effective_threads(),
            beam_size: config.beam_size.max(1),
        })
    }

    fn params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: self.beam_size as i32,
            patience: 1.0,
        });
        params.set_language(Some(self.language.as_deref().unwrap_or("auto")));
        params.set_translate(false);
        params.set_n_threads(self.threads as i32);
        params.set_token_timestamps(true);
        params.set_suppress_blank(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params
    }

    fn words(&self, segment: &WhisperSegment) -> Vec<Word> {
        let eot = self.ctx.token_eot();
        let mut words: Vec<Word> = Vec::new();
        let mut probabilities: Vec<f32> = Vec::new();

        for i in 0..segment.n_tokens() {
            let Some(token) = segment.get_token(i) else {
                continue;
            };
            if token.token_id() >= eot {
                continue;
            }
            let Ok(piece) = token.to_str_lossy() else {
                continue;
            };
            let data = token.token_data();
            let start = data.t0 as f64 / TIMESTAMP_SCALE;
            let end = data.t1 as f64 / TIMESTAMP_SCALE;

            match words.last_mut() {
                Some(word) if !piece.starts_with(' ') => {
                    word.text.push_str(&piece);
                    word.end = end.max(word.end);
                    probabilities.push(data.p);
                    word.probability = mean(&probabilities);
                }
                _ => {
                    probabilities.clear();
                    probabilities.push(data.p);
                    words.push(Word {
                        start,
                        end,
                        text: piece.into_owned(),
                        probability: data.p,
                    });
                }
            }
        }

        words
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

impl Engine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper.cpp"
    }

    fn transcribe(&self, samples: &[f32]) -> Result<EngineOutput, EngineError> {
        let mut slot = self
            .state
            .lock()
            .map_err(|_| EngineError::Inference("decoder state lock poisoned".to_string()))?;

        if slot.is_none() {
            debug!("Creating whisper decoder state");
            let state = self
                .ctx
                .create_state()
                .map_err(|e| EngineError::Inference(format!("failed to create state: {}", e)))?;
            *slot = Some(state);
        }
        let Some(state) = slot.as_mut() else {
            return Err(EngineError::Inference("decoder state missing".to_string()));
        };

        state
            .full(self.params(), samples)
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let mut segments = Vec::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let text = segment
                .to_str_lossy()
                .map_err(|e| EngineError::Inference(e.to_string()))?
                .into_owned();

            segments.push(Segment {
                start: segment.start_timestamp() as f64 / TIMESTAMP_SCALE,
                end: segment.end_timestamp() as f64 / TIMESTAMP_SCALE,
                text,
                words: WordDetail::Available(self.words(&segment)),
            });
        }

        let lang_id = state.full_lang_id_from_state();
        let language = whisper_rs::get_lang_str(lang_id).map(str::to_string);
        let language_probability = match state.lang_detect(0, self.threads) {
            Ok((_, probabilities)) => usize::try_from(lang_id)
                .ok()
                .and_then(|idx| probabilities.get(idx).copied())
                .unwrap_or(0.0),
            Err(e) => {
                warn!("Language probability unavailable: {}", e);
                0.0
            }
        };

        Ok(EngineOutput {
            segments,
            language,
            language_probability,
        })
    }

    fn release_caches(&self) {
        if let Ok(mut slot) = self.state.lock() {
            if slot.take().is_some() {
                debug!("Dropped whisper decoder state");
            }
        }
    }
}
