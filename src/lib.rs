// Transcribe API Library
//
// This crate provides an HTTP API for speech-to-text transcription with a
// single in-process inference engine. Requests run concurrently up to the
// engine, which serves them one at a time in arrival order.

pub mod audio;
pub mod config;
pub mod config_loader;
pub mod config_validator;
pub mod engine;
pub mod error;
pub mod file_utils;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod transcript;
pub mod vad;

// Re-export common types for easier access
pub use config::{AuthConfig, EngineConfig, MetricsConfig, PipelineConfig, ServerConfig};
pub use engine::{load_engine, Engine, EngineError};
pub use error::HandlerError;
pub use handlers::{configure, Authentication};
pub use metrics::Metrics;
pub use models::{DetailedTranscription, ErrorResponse, ServiceInfoResponse};
pub use pipeline::{AudioJob, Pipeline, PipelineError, Transcription};
pub use transcript::TranscriptionResult;
pub use vad::VadConfig;
