// Transcribe API data models
//
// This module contains the serializable response types of the HTTP API.

use serde::Serialize;

/// Detailed transcription body returned when `detailed=true`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedTranscription {
    pub full_text: String,
    /// Detected language, `null` when no speech was transcribed
    pub language: Option<String>,
    pub language_probability: f32,
    pub segments: Vec<SegmentView>,
    /// Duration of the submitted audio in seconds
    pub duration: f64,
}

/// One segment of a detailed transcription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentView {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Empty when the engine reported no word timings
    pub words: Vec<WordView>,
}

/// One word of a segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordView {
    pub start: f64,
    pub end: f64,
    pub word: String,
    pub probability: f32,
}

/// Error response for API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Response of the service information endpoint
#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    pub api_version: String,
    pub frontend_version: Option<String>,
}
