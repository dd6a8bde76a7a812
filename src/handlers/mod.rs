// Transcribe API HTTP handlers
//
// This module contains the HTTP handlers for the Transcribe API.
// It provides the interface between HTTP requests and the transcription pipeline.

pub mod authentication;
pub mod query;
pub mod routes;


// Re-export handlers for easier access
pub use self::routes::{configure, metrics_handler, service_info, transcribe_file, transcribe_raw};
// Re-export authentication middleware
pub use self::authentication::Authentication;
