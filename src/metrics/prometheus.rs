//! Prometheus metrics exporter
//!
//! Metric families are created lazily on first use and registered in a
//! private registry that `/metrics` renders in the text exposition format.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use prometheus::core::Collector;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::metrics::error::{validation, MetricsError};
use crate::metrics::metrics::MetricsExporter;

const DEFAULT_MAX_METRICS: usize = 1000;

pub struct PrometheusExporter {
    registry: Registry,
    counters: DashMap<String, CounterVec>,
    gauges: DashMap<String, GaugeVec>,
    histograms: DashMap<String, HistogramVec>,
    /// Upper bound on distinct metric families
    max_metrics: usize,
    /// Optional prefix for every metric name
    namespace: Option<String>,
    metric_count: AtomicUsize,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            max_metrics: DEFAULT_MAX_METRICS,
            namespace: None,
            metric_count: AtomicUsize::new(0),
        }
    }

    /// Exporter prefixing every metric with `namespace_`
    pub fn with_namespace(namespace: &str) -> Result<Self, MetricsError> {
        validation::validate_metric_name(namespace).map_err(|e| {
            MetricsError::configuration_error(format!("Invalid namespace '{}': {}", namespace, e))
        })?;
        Ok(Self {
            namespace: Some(namespace.to_string()),
            ..Self::new()
        })
    }

    fn full_name(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, name),
            None => name.to_string(),
        }
    }

    fn help_text(name: &str) -> String {
        name.replace('_', " ")
    }

    /// Buckets picked from the metric name
    fn buckets(name: &str) -> Vec<f64> {
        if name.ends_with("_seconds") {
            vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
            ]
        } else {
            prometheus::DEFAULT_BUCKETS.to_vec()
        }
    }

    fn reserve_slot(&self) -> Result<(), MetricsError> {
        let previous = self
            .metric_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_metrics).then_some(n + 1)
            });
        previous.map(|_| ()).map_err(|_| {
            MetricsError::resource_limit_exceeded(format!(
                "Maximum number of metrics ({}) exceeded",
                self.max_metrics
            ))
        })
    }

    fn check_type_conflict(&self, full_name: &str, kind: &str) -> Result<(), MetricsError> {
        let existing = [
            (self.counters.contains_key(full_name), "counter"),
            (self.gauges.contains_key(full_name), "gauge"),
            (self.histograms.contains_key(full_name), "histogram"),
        ];
        for (exists, existing_kind) in existing {
            if exists && existing_kind != kind {
                return Err(MetricsError::registration_failed(
                    full_name,
                    format!("already registered as {}", existing_kind),
                ));
            }
        }
        Ok(())
    }

    /// Get the family called `name`, creating and registering it on first use
    fn get_or_create<M, F>(
        &self,
        map: &DashMap<String, M>,
        kind: &str,
        name: &str,
        build: F,
    ) -> Result<M, MetricsError>
    where
        M: Collector + Clone + 'static,
        F: FnOnce(&str) -> prometheus::Result<M>,
    {
        let full_name = self.full_name(name);
        if let Some(existing) = map.get(&full_name) {
            return Ok(existing.clone());
        }
        self.check_type_conflict(&full_name, kind)?;

        match map.entry(full_name.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                self.reserve_slot()?;
                let created = build(&full_name).and_then(|metric| {
                    self.registry.register(Box::new(metric.clone()))?;
                    Ok(metric)
                });
                match created {
                    Ok(metric) => {
                        debug!("Registered {} {}", kind, full_name);
                        Ok(e.insert(metric).clone())
                    }
                    Err(err) => {
                        self.metric_count.fetch_sub(1, Ordering::SeqCst);
                        Err(MetricsError::registration_failed(name, err.to_string()))
                    }
                }
            }
        }
    }

    /// Sorted label names and the values in matching order
    fn split_labels<'a>(labels: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
        let mut sorted = labels.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted.into_iter().unzip()
    }

    pub fn metric_count(&self) -> usize {
        self.metric_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsExporter for PrometheusExporter {
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        let (keys, values) = Self::split_labels(labels);

        let counter = self.get_or_create(&self.counters, "counter", name, |full| {
            CounterVec::new(Opts::new(full, Self::help_text(name)), &keys)
        })?;
        counter
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .inc();
        Ok(())
    }

    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (keys, values) = Self::split_labels(labels);

        let gauge = self.get_or_create(&self.gauges, "gauge", name, |full| {
            GaugeVec::new(Opts::new(full, Self::help_text(name)), &keys)
        })?;
        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .set(value);
        Ok(())
    }

    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (keys, values) = Self::split_labels(labels);

        let histogram = self.get_or_create(&self.histograms, "histogram", name, |full| {
            let opts = HistogramOpts::new(full, Self::help_text(name)).buckets(Self::buckets(name));
            HistogramVec::new(opts, &keys)
        })?;
        histogram
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .observe(value);
        Ok(())
    }

    async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::export_failed(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}
