// API route handlers for Transcribe API
//
// This module contains the HTTP endpoints. The transcription routes only parse
// the request and hand it to the shared pipeline; the pipeline owns
// serialization of engine access and every cleanup step.

use std::time::Instant;

use actix_web::{get, post, web, HttpResponse};
use log::{error, info};

use crate::config::ServerConfig;
use crate::error::HandlerError;
use crate::handlers::query::TranscribeQuery;
use crate::metrics::Metrics;
use crate::models::ServiceInfoResponse;
use crate::pipeline::{AudioInput, AudioJob, Pipeline, Transcription};

/// Transcribe an uploaded audio file of any format ffmpeg can read
///
/// The body is the raw file. With `detailed=true` the response is the JSON
/// detail object, otherwise the plain text.
#[post("/transcribe/file")]
pub async fn transcribe_file(
    body: web::Bytes,
    query: web::Query<TranscribeQuery>,
    pipeline: web::Data<Pipeline>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    transcribe(
        "/transcribe/file",
        AudioInput::Container(&body),
        &query,
        &pipeline,
        &metrics,
    )
    .await
}

/// Transcribe raw 16 kHz mono 16-bit little-endian PCM
#[post("/transcribe/raw")]
pub async fn transcribe_raw(
    body: web::Bytes,
    query: web::Query<TranscribeQuery>,
    pipeline: web::Data<Pipeline>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    transcribe(
        "/transcribe/raw",
        AudioInput::Pcm(&body),
        &query,
        &pipeline,
        &metrics,
    )
    .await
}

async fn transcribe(
    endpoint: &str,
    input: AudioInput<'_>,
    query: &TranscribeQuery,
    pipeline: &Pipeline,
    metrics: &Metrics,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();

    let outcome = run_job(input, query, pipeline).await;

    let status = match &outcome {
        Ok(_) => "200",
        Err(HandlerError::InvalidParameter(_)) => "400",
        Err(HandlerError::Transcription(_)) => "500",
    };
    metrics
        .record_http_request(endpoint, "POST", status, start_time.elapsed().as_secs_f64())
        .await;

    let response = match outcome? {
        Transcription::Plain(text) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(text),
        Transcription::Detailed(detail) => HttpResponse::Ok().json(detail),
    };
    Ok(response)
}

async fn run_job(
    input: AudioInput<'_>,
    query: &TranscribeQuery,
    pipeline: &Pipeline,
) -> Result<Transcription, HandlerError> {
    let vad = query.vad_config()?;
    let job = AudioJob::new(input, vad, query.detailed());
    info!(
        "Job {}: received {} request (vad: {}, detailed: {})",
        job.id,
        match input {
            AudioInput::Pcm(_) => "raw",
            AudioInput::Container(_) => "file",
        },
        job.vad.is_some(),
        job.detailed
    );

    Ok(pipeline.run(job).await?)
}

/// Service version information
#[get("/srv/get")]
pub async fn service_info(
    config: web::Data<ServerConfig>,
    metrics: web::Data<Metrics>,
) -> HttpResponse {
    let start_time = Instant::now();

    let response = HttpResponse::Ok().json(ServiceInfoResponse {
        api_version: config.api_version.clone(),
        frontend_version: config.frontend_version.clone(),
    });

    metrics
        .record_http_request("/srv/get", "GET", "200", start_time.elapsed().as_secs_f64())
        .await;
    response
}

/// Metrics in the exporter's exposition format
#[get("/metrics")]
pub async fn metrics_handler(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.export().await {
        Ok(data) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(data),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Register every route on `cfg`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(transcribe_file)
        .service(transcribe_raw)
        .service(service_info)
        .service(metrics_handler);
}
