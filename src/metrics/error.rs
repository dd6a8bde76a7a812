//! Error types for the metrics system
//!
//! Metrics must never take a request down, so every failure is a value that
//! the facade logs and drops.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    /// Invalid metric name (empty, bad characters, bad first character)
    #[error("Invalid metric name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Invalid label name or value
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    /// Value that cannot be recorded faithfully
    #[error("Invalid value '{value}': {reason}")]
    InvalidValue { value: String, reason: String },

    /// Metric registration failed (type conflict, registry error)
    #[error("Failed to register metric '{name}': {reason}")]
    RegistrationFailed { name: String, reason: String },

    #[error("Failed to export metrics: {reason}")]
    ExportFailed { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Too many distinct metrics
    #[error("Resource limit exceeded: {reason}")]
    ResourceLimitExceeded { reason: String },
}

impl MetricsError {
    pub fn invalid_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_label<L: Into<String>, R: Into<String>>(label: L, reason: R) -> Self {
        Self::InvalidLabel {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_value<V: fmt::Display, R: Into<String>>(value: V, reason: R) -> Self {
        Self::InvalidValue {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn registration_failed<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::RegistrationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn export_failed<R: Into<String>>(reason: R) -> Self {
        Self::ExportFailed {
            reason: reason.into(),
        }
    }

    pub fn configuration_error<R: Into<String>>(reason: R) -> Self {
        Self::ConfigurationError {
            reason: reason.into(),
        }
    }

    pub fn resource_limit_exceeded<R: Into<String>>(reason: R) -> Self {
        Self::ResourceLimitExceeded {
            reason: reason.into(),
        }
    }
}

/// Validation of metric names, labels and values against Prometheus rules
pub mod validation {
    use super::MetricsError;
    use std::collections::HashSet;

    const RESERVED_LABELS: &[&str] = &["__name__", "__value__"];
    const MAX_NAME_LENGTH: usize = 512;
    const MAX_LABEL_VALUE_LENGTH: usize = 1024;
    const MAX_LABELS_PER_METRIC: usize = 16;

    fn check_identifier(ident: &str, allow_colon: bool) -> Result<(), String> {
        let mut chars = ident.chars();
        match chars.next() {
            None => return Err("must not be empty".to_string()),
            Some(first) if !first.is_ascii_alphabetic() && first != '_' => {
                return Err("must start with a letter or underscore".to_string())
            }
            Some(_) => {}
        }
        for (i, ch) in ident.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '_' || (allow_colon && ch == ':')) {
                return Err(format!("invalid character '{}' at position {}", ch, i));
            }
        }
        Ok(())
    }

    /// Metric names: `[a-zA-Z_:][a-zA-Z0-9_:]*`, bounded length
    pub fn validate_metric_name(name: &str) -> Result<(), MetricsError> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(MetricsError::invalid_name(
                name,
                format!("longer than {} characters", MAX_NAME_LENGTH),
            ));
        }
        check_identifier(name, true).map_err(|reason| MetricsError::invalid_name(name, reason))
    }

    pub fn validate_label_key(key: &str) -> Result<(), MetricsError> {
        if RESERVED_LABELS.contains(&key) {
            return Err(MetricsError::invalid_label(key, "reserved by Prometheus"));
        }
        check_identifier(key, false).map_err(|reason| MetricsError::invalid_label(key, reason))
    }

    pub fn validate_label_value(value: &str) -> Result<(), MetricsError> {
        if value.len() > MAX_LABEL_VALUE_LENGTH {
            return Err(MetricsError::invalid_label(
                value,
                format!("value longer than {} characters", MAX_LABEL_VALUE_LENGTH),
            ));
        }
        if value.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
            return Err(MetricsError::invalid_label(
                value,
                "value contains quotes, backslashes or control characters",
            ));
        }
        Ok(())
    }

    /// Validate a label set: bounded size, valid pairs, no duplicate keys
    pub fn validate_labels(labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        if labels.len() > MAX_LABELS_PER_METRIC {
            return Err(MetricsError::invalid_label(
                "labels",
                format!("more than {} labels", MAX_LABELS_PER_METRIC),
            ));
        }
        let mut seen = HashSet::new();
        for (key, value) in labels {
            validate_label_key(key)?;
            validate_label_value(value)?;
            if !seen.insert(*key) {
                return Err(MetricsError::invalid_label(*key, "duplicate label key"));
            }
        }
        Ok(())
    }

    pub fn validate_numeric_value(value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::invalid_value(value, "must be finite"));
        }
        if value.abs() > (1u64 << 53) as f64 {
            return Err(MetricsError::invalid_value(
                value,
                "too large to be represented exactly",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validation::*;

    #[test]
    fn metric_names_follow_prometheus_rules() {
        assert!(validate_metric_name("transcriptions_total").is_ok());
        assert!(validate_metric_name("_internal").is_ok());
        assert!(validate_metric_name("ns:gate_wait_seconds").is_ok());

        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name("1st").is_err());
        assert!(validate_metric_name("bad-name").is_err());
    }

    #[test]
    fn label_sets_are_checked() {
        assert!(validate_labels(&[("input", "pcm"), ("status", "success")]).is_ok());
        assert!(validate_labels(&[("input", "pcm"), ("input", "file")]).is_err());
        assert!(validate_labels(&[("__name__", "x")]).is_err());
        assert!(validate_labels(&[("status", "bad\"value")]).is_err());
    }

    #[test]
    fn numeric_values_must_be_finite() {
        assert!(validate_numeric_value(0.25).is_ok());
        assert!(validate_numeric_value(f64::NAN).is_err());
        assert!(validate_numeric_value(f64::INFINITY).is_err());
        assert!(validate_numeric_value(1e20).is_err());
    }
}
