// Query string of the transcription routes
//
// Every field is taken as an optional string so a malformed value surfaces as
// our own 400 message instead of actix's generic query rejection.

use serde::Deserialize;

use crate::error::HandlerError;
use crate::vad::{VadConfig, VadParams};

#[derive(Debug, Default, Deserialize)]
pub struct TranscribeQuery {
    pub detailed: Option<String>,
    pub vad: Option<String>,
    pub vad_threshold: Option<String>,
    pub vad_min_speech: Option<String>,
    pub vad_max_speech: Option<String>,
    pub vad_min_silence: Option<String>,
    pub vad_speech_pad: Option<String>,
}

/// Only a case-insensitive `true` switches a flag on
fn flag(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl TranscribeQuery {
    pub fn detailed(&self) -> bool {
        flag(&self.detailed)
    }

    /// VAD settings for the request, `None` when VAD is off
    ///
    /// The numeric parameters are checked even when VAD is off.
    pub fn vad_config(&self) -> Result<Option<VadConfig>, HandlerError> {
        let params = VadParams {
            threshold: self.vad_threshold.as_deref(),
            min_speech: self.vad_min_speech.as_deref(),
            max_speech: self.vad_max_speech.as_deref(),
            min_silence: self.vad_min_silence.as_deref(),
            speech_pad: self.vad_speech_pad.as_deref(),
        };
        let config = VadConfig::from_params(&params)?;
        Ok(flag(&self.vad).then_some(config))
    }
}
