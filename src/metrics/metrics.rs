//! Metrics facade
//!
//! [`MetricsExporter`] is the backend seam; [`Metrics`] wraps one exporter
//! and offers the domain-level recording helpers used by the handlers and the
//! pipeline. The helpers never fail: exporter errors are logged at `warn` and
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::config::MetricsConfig;
use crate::metrics::error::MetricsError;
use crate::metrics::null::NullExporter;
use crate::metrics::prometheus::PrometheusExporter;

/// Pluggable metrics backend
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    /// Increment a counter by one
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError>;

    /// Set a gauge to `value`
    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Record one observation in a histogram
    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Render the current metrics in the backend's exposition format
    async fn export(&self) -> Result<Vec<u8>, MetricsError>;
}

#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<dyn MetricsExporter>,
}

impl Metrics {
    pub fn new(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self { exporter }
    }

    /// Metrics that record nothing
    pub fn disabled() -> Self {
        Self::new(create_null_exporter())
    }

    pub async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        self.exporter.increment(name, labels).await
    }

    pub async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.exporter.set_gauge(name, value, labels).await
    }

    pub async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.exporter.observe_histogram(name, value, labels).await
    }

    pub async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        self.exporter.export().await
    }

    /// Record one served HTTP request
    pub async fn record_http_request(&self, endpoint: &str, method: &str, status: &str, duration: f64) {
        let labels = [("endpoint", endpoint), ("method", method), ("status", status)];
        self.observe_internal("http_request_duration_seconds", duration, &labels)
            .await;
        self.increment_internal("http_requests_total", &labels).await;
    }

    /// Record one finished transcription
    ///
    /// `input` is `pcm` or `file`, `status` is `success` or the failure kind.
    pub async fn record_transcription(&self, input: &str, status: &str, duration: f64, audio_seconds: f64) {
        let labels = [("input", input), ("status", status)];
        self.observe_internal("transcription_duration_seconds", duration, &labels)
            .await;
        self.increment_internal("transcriptions_total", &labels).await;
        if audio_seconds > 0.0 {
            self.observe_internal("transcribed_audio_seconds", audio_seconds, &[("input", input)])
                .await;
        }
    }

    /// Record how long a job waited for the engine
    pub async fn record_gate_wait(&self, seconds: f64) {
        self.observe_internal("engine_gate_wait_seconds", seconds, &[])
            .await;
    }

    /// Publish the number of jobs queued for the engine
    pub async fn set_gate_waiters(&self, waiters: usize) {
        self.gauge_internal("engine_gate_waiters", waiters as f64, &[])
            .await;
    }

    async fn increment_internal(&self, name: &str, labels: &[(&str, &str)]) {
        if let Err(e) = self.increment(name, labels).await {
            warn!("Failed to increment metric '{}': {}", name, e);
        }
    }

    async fn gauge_internal(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.set_gauge(name, value, labels).await {
            warn!("Failed to set gauge '{}': {}", name, e);
        }
    }

    async fn observe_internal(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.observe_histogram(name, value, labels).await {
            warn!("Failed to observe histogram '{}': {}", name, e);
        }
    }
}

/// Build the exporter selected by `config`
///
/// Unknown exporter types fall back to the null exporter.
pub fn create_metrics_exporter(
    config: &MetricsConfig,
) -> Result<Arc<dyn MetricsExporter>, MetricsError> {
    match config.exporter_type.to_lowercase().as_str() {
        "prometheus" => {
            debug!("Initializing Prometheus metrics exporter");
            match &config.namespace {
                Some(ns) => Ok(Arc::new(PrometheusExporter::with_namespace(ns)?)),
                None => Ok(Arc::new(PrometheusExporter::new())),
            }
        }
        "none" | "null" | "disabled" => {
            debug!("Metrics disabled, using null exporter");
            Ok(create_null_exporter())
        }
        other => {
            warn!("Unknown metrics exporter type '{}', using null exporter", other);
            Ok(create_null_exporter())
        }
    }
}

pub fn create_prometheus_exporter() -> Arc<dyn MetricsExporter> {
    Arc::new(PrometheusExporter::new())
}

pub fn create_null_exporter() -> Arc<dyn MetricsExporter> {
    Arc::new(NullExporter)
}
