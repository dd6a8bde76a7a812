// Error handling for Transcribe API
//
// This module defines the errors the HTTP handlers return and how each one is
// turned into a response. Client mistakes get a 400 with a JSON message;
// pipeline failures get a bare 500 and are only described in the server log.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::pipeline::PipelineError;
use crate::vad::VadParamError;

/// Errors that can occur in the Transcribe API handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A query parameter could not be used, reported before any work starts
    #[error("{0}")]
    InvalidParameter(String),

    /// The transcription itself failed
    #[error(transparent)]
    Transcription(#[from] PipelineError),
}

impl From<VadParamError> for HandlerError {
    fn from(err: VadParamError) -> Self {
        HandlerError::InvalidParameter(err.to_string())
    }
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            HandlerError::Transcription(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            HandlerError::InvalidParameter(msg) => HttpResponse::BadRequest().json(ErrorResponse {
                error: msg.clone(),
            }),
            // already logged with its stage by the pipeline
            HandlerError::Transcription(_) => HttpResponse::InternalServerError().finish(),
        }
    }
}
