//! Integration tests for the metrics system
//!
//! These tests drive the facade against real exporters and check what ends
//! up in the exposition output.

use crate::config::MetricsConfig;
use crate::metrics::{
    create_metrics_exporter, create_null_exporter, create_prometheus_exporter, MetricsError,
    Metrics,
};

fn prometheus_config(namespace: Option<&str>) -> MetricsConfig {
    MetricsConfig {
        exporter_type: "prometheus".to_string(),
        namespace: namespace.map(str::to_string),
    }
}

async fn exported_text(metrics: &Metrics) -> String {
    let exported = metrics.export().await.expect("Failed to export metrics");
    String::from_utf8(exported).expect("Invalid UTF-8 in exported metrics")
}

#[tokio::test]
async fn test_prometheus_metrics_basic_operations() {
    let metrics = Metrics::new(create_prometheus_exporter());

    metrics
        .increment("test_counter", &[("label", "value")])
        .await
        .expect("Failed to increment counter");
    metrics
        .set_gauge("test_gauge", 42.0, &[])
        .await
        .expect("Failed to set gauge");
    metrics
        .observe_histogram("test_histogram", 1.23, &[("type", "test")])
        .await
        .expect("Failed to observe histogram");

    let text = exported_text(&metrics).await;
    assert!(text.contains("test_counter"));
    assert!(text.contains("test_gauge 42"));
    assert!(text.contains("test_histogram_bucket"));
}

#[tokio::test]
async fn test_null_exporter_never_fails() {
    let metrics = Metrics::new(create_null_exporter());

    metrics.record_transcription("pcm", "success", 0.5, 3.0).await;
    metrics.set_gate_waiters(2).await;
    assert!(metrics.set_gauge("any_gauge", f64::NAN, &[]).await.is_ok());

    let exported = metrics.export().await.expect("Null exporter should never fail");
    assert!(exported.is_empty());
}

#[tokio::test]
async fn test_metrics_validation_errors() {
    let exporter = create_prometheus_exporter();

    let result = exporter.increment("", &[]).await;
    assert!(matches!(result, Err(MetricsError::InvalidName { .. })));

    let result = exporter.set_gauge("valid_name", f64::INFINITY, &[]).await;
    assert!(matches!(result, Err(MetricsError::InvalidValue { .. })));

    let result = exporter.increment("valid_name", &[("", "value")]).await;
    assert!(matches!(result, Err(MetricsError::InvalidLabel { .. })));
}

#[tokio::test]
async fn test_domain_helpers_reach_the_exporter() {
    let exporter = create_metrics_exporter(&prometheus_config(Some("transcribe")))
        .expect("Failed to create exporter");
    let metrics = Metrics::new(exporter);

    metrics
        .record_http_request("/transcribe/raw", "POST", "200", 0.25)
        .await;
    metrics.record_transcription("file", "success", 1.5, 12.0).await;
    metrics.record_transcription("file", "decode_failed", 0.1, 0.0).await;
    metrics.record_gate_wait(0.02).await;
    metrics.set_gate_waiters(3).await;

    let text = exported_text(&metrics).await;
    assert!(text.contains(
        "transcribe_http_requests_total{endpoint=\"/transcribe/raw\",method=\"POST\",status=\"200\"} 1"
    ));
    assert!(text.contains("transcribe_transcriptions_total{input=\"file\",status=\"success\"} 1"));
    assert!(text.contains("transcribe_transcriptions_total{input=\"file\",status=\"decode_failed\"} 1"));
    assert!(text.contains("transcribe_engine_gate_waiters 3"));
    assert!(text.contains("transcribe_engine_gate_wait_seconds_count 1"));
}

#[tokio::test]
async fn test_helpers_swallow_exporter_errors() {
    let metrics = Metrics::new(create_prometheus_exporter());

    // Non-finite values are rejected by the exporter, the helper only logs
    metrics.record_gate_wait(f64::NAN).await;
    metrics
        .record_http_request("/transcribe/raw", "POST", "bad\"status", 0.1)
        .await;

    let text = exported_text(&metrics).await;
    assert!(!text.contains("engine_gate_wait_seconds_count"));
}

#[test]
fn test_exporter_selection() {
    assert!(create_metrics_exporter(&prometheus_config(None)).is_ok());
    assert!(create_metrics_exporter(&prometheus_config(Some("bad-namespace"))).is_err());

    let disabled = MetricsConfig {
        exporter_type: "disabled".to_string(),
        namespace: None,
    };
    assert!(create_metrics_exporter(&disabled).is_ok());
}
