//! Result assembly
//!
//! Turns a [`TranscriptionResult`] into one of the two public response shapes.

use crate::models::{DetailedTranscription, SegmentView, WordView};
use crate::transcript::TranscriptionResult;

/// A finished transcription in its response shape
#[derive(Debug, Clone, PartialEq)]
pub enum Transcription {
    /// `full_text` only
    Plain(String),
    Detailed(DetailedTranscription),
}

pub fn assemble(result: &TranscriptionResult, detailed: bool) -> Transcription {
    if !detailed {
        return Transcription::Plain(result.full_text());
    }

    let segments = result
        .segments()
        .iter()
        .map(|segment| SegmentView {
            start: segment.start,
            end: segment.end,
            text: segment.text.trim().to_string(),
            words: segment
                .words
                .words()
                .iter()
                .map(|word| WordView {
                    start: word.start,
                    end: word.end,
                    word: word.text.trim().to_string(),
                    probability: word.probability,
                })
                .collect(),
        })
        .collect();

    Transcription::Detailed(DetailedTranscription {
        full_text: result.full_text(),
        language: result.language().map(str::to_string),
        language_probability: result.language_probability(),
        segments,
        duration: result.duration(),
    })
}
