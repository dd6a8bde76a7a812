// Transcribe API metrics for monitoring and observability
//
// This module contains the metrics for the Transcribe API.
// It provides functionality to track and report various metrics

pub mod error;
#[allow(clippy::module_inception)]
pub mod metrics;
pub mod null;
pub mod prometheus;

#[cfg(test)]
mod tests;

pub use error::MetricsError;
pub use metrics::{
    create_metrics_exporter, create_null_exporter, create_prometheus_exporter, Metrics,
    MetricsExporter,
};
