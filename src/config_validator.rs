// Configuration validation module for Transcribe API
//
// This module validates every configuration parameter and environment variable
// at startup, so a typo in a deployment surfaces as a clear error instead of a
// silently applied default.
//
// The validation is schema-driven: a central registry defines the type, range,
// default and severity of each option.

use std::env;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use log::{error, info, warn};

/// Configuration parameter types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigType {
    String,
    UnsignedInteger,
    Boolean,
    IpAddress,
    Port,
    FilePath,
    Enum(&'static [&'static str]),
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationLevel {
    Critical, // Must be valid for application to start
    Standard, // Important but application can start with defaults
    Warning,  // Optional, generates warnings only
}

/// Configuration parameter definition
#[derive(Debug, Clone)]
pub struct ConfigParam {
    pub name: &'static str,
    pub description: &'static str,
    pub param_type: ConfigType,
    pub default_value: Option<&'static str>,
    pub validation_level: ValidationLevel,
    pub min_value: Option<u64>,
    pub max_value: Option<u64>,
}

const DEVICES: &[&str] = &["cpu", "cuda", "gpu", "auto"];
const METRICS_BACKENDS: &[&str] = &["prometheus", "none", "null", "disabled"];

/// Centralized configuration parameter registry
pub const CONFIG_PARAMS: &[ConfigParam] = &[
    // Server Configuration
    ConfigParam {
        name: "TRANSCRIBE_API_HOST",
        description: "Host IP address for the API server",
        param_type: ConfigType::IpAddress,
        default_value: Some("127.0.0.1"),
        validation_level: ValidationLevel::Critical,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_API_PORT",
        description: "Port for the API server",
        param_type: ConfigType::Port,
        default_value: Some("8181"),
        validation_level: ValidationLevel::Critical,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_API_TIMEOUT",
        description: "Client disconnect timeout in seconds",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("480"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(1),
        max_value: Some(3600),
    },
    ConfigParam {
        name: "TRANSCRIBE_API_KEEPALIVE",
        description: "Keep-alive timeout in seconds",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("480"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(1),
        max_value: Some(3600),
    },
    ConfigParam {
        name: "HTTP_WORKER_NUMBER",
        description: "Number of HTTP workers (0 = use CPU cores)",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("0"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(0),
        max_value: Some(64),
    },
    ConfigParam {
        name: "MAX_FILE_SIZE",
        description: "Largest accepted request body in bytes",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("536870912"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(1024),
        max_value: None,
    },
    // Pipeline Configuration
    ConfigParam {
        name: "TRANSCRIBE_SCRATCH_DIR",
        description: "Directory for temporary transcoding artifacts",
        param_type: ConfigType::String,
        default_value: Some("/tmp/audioconversion"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_FFMPEG_CMD",
        description: "ffmpeg executable used to normalize uploaded audio",
        param_type: ConfigType::String,
        default_value: Some("ffmpeg"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_WORKER_POOL_SIZE",
        description: "Background workers running inference",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("1"),
        validation_level: ValidationLevel::Critical,
        min_value: Some(1),
        max_value: Some(16),
    },
    ConfigParam {
        name: "TRANSCRIBE_RECLAIM_INTERVAL",
        description: "Release engine caches every N jobs (0 = never)",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("1"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_REQUEST_DEADLINE_SECONDS",
        description: "Overall deadline per transcription request (0 = none)",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("0"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    // Engine Configuration
    ConfigParam {
        name: "TRANSCRIBE_MODEL_PATH",
        description: "Model file loaded once at startup",
        param_type: ConfigType::FilePath,
        default_value: Some("models/ggml-base.bin"),
        validation_level: ValidationLevel::Warning,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_DEVICE",
        description: "Compute device for inference",
        param_type: ConfigType::Enum(DEVICES),
        default_value: Some("auto"),
        validation_level: ValidationLevel::Critical,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_DEVICE_INDEX",
        description: "Accelerator index when several are present",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("0"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(0),
        max_value: Some(64),
    },
    ConfigParam {
        name: "TRANSCRIBE_THREADS",
        description: "Inference threads (0 = use CPU cores)",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("0"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(0),
        max_value: Some(256),
    },
    ConfigParam {
        name: "TRANSCRIBE_BEAM_SIZE",
        description: "Beam width used while decoding",
        param_type: ConfigType::UnsignedInteger,
        default_value: Some("5"),
        validation_level: ValidationLevel::Standard,
        min_value: Some(1),
        max_value: Some(16),
    },
    ConfigParam {
        name: "TRANSCRIBE_LANGUAGE",
        description: "Language code to force, or auto to detect it",
        param_type: ConfigType::String,
        default_value: Some("auto"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    // Service Information
    ConfigParam {
        name: "TRANSCRIBE_API_VERSION",
        description: "Version reported by /srv/get (defaults to the crate version)",
        param_type: ConfigType::String,
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_FRONTEND_VERSION",
        description: "Frontend version reported by /srv/get",
        param_type: ConfigType::String,
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    // Access Configuration
    ConfigParam {
        name: "ENABLE_AUTHORIZATION",
        description: "Require a bearer token on transcription routes",
        param_type: ConfigType::Boolean,
        default_value: Some("false"),
        validation_level: ValidationLevel::Critical,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_API_TOKENS",
        description: "Comma-separated bearer tokens accepted when authorization is enabled",
        param_type: ConfigType::String,
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    // Metrics Configuration
    ConfigParam {
        name: "TRANSCRIBE_API_METRICS_ENABLED",
        description: "Collect and expose metrics",
        param_type: ConfigType::Boolean,
        default_value: Some("true"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "TRANSCRIBE_API_METRICS_BACKEND",
        description: "Metrics exporter",
        param_type: ConfigType::Enum(METRICS_BACKENDS),
        default_value: Some("prometheus"),
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "METRICS_BACKEND",
        description: "Fallback for TRANSCRIBE_API_METRICS_BACKEND",
        param_type: ConfigType::Enum(METRICS_BACKENDS),
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
    ConfigParam {
        name: "PROMETHEUS_NAMESPACE",
        description: "Optional prefix for every metric name",
        param_type: ConfigType::String,
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min_value: None,
        max_value: None,
    },
];

#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub error_type: ConfigErrorType,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigErrorType {
    InvalidValue,
    InvalidFormat,
    InvalidRange,
    FileNotFound,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Configuration error in '{}' ({:?}): {} (value: '{}')",
            self.field, self.error_type, self.message, self.value
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " - Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result type for configuration validation
pub type ValidationResult<T> = Result<T, ConfigValidationError>;

/// Configuration validation results
#[derive(Debug, Default)]
pub struct ValidationResults {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(&mut self, level: ValidationLevel, error: ConfigValidationError) {
        match level {
            ValidationLevel::Critical | ValidationLevel::Standard => self.errors.push(error),
            ValidationLevel::Warning => self.warnings.push(error),
        }
    }

    pub fn print_summary(&self) {
        if !self.errors.is_empty() {
            error!(
                "Configuration validation found {} error(s):",
                self.errors.len()
            );
            for (i, err) in self.errors.iter().enumerate() {
                error!("  {}. {}", i + 1, err);
            }
        }

        if !self.warnings.is_empty() {
            warn!(
                "Configuration validation found {} warning(s):",
                self.warnings.len()
            );
            for (i, warning) in self.warnings.iter().enumerate() {
                warn!("  {}. {}", i + 1, warning);
            }
        }

        if self.is_valid() && self.warnings.is_empty() {
            info!("Configuration validation passed successfully");
        } else if self.is_valid() {
            info!(
                "Configuration validation passed with {} warning(s)",
                self.warnings.len()
            );
        }
    }
}

/// Helper functions for common validation patterns
pub mod validators {
    use super::*;

    fn invalid(
        field: &str,
        value: &str,
        error_type: ConfigErrorType,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> ConfigValidationError {
        ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            error_type,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Validate boolean values from string
    pub fn validate_boolean(field: &str, value: &str) -> ValidationResult<bool> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(invalid(
                field,
                value,
                ConfigErrorType::InvalidValue,
                "Invalid boolean value",
                "Use 'true' or 'false'",
            )),
        }
    }

    /// Validate unsigned integer values with optional range
    pub fn validate_unsigned(
        field: &str,
        value: &str,
        min: Option<u64>,
        max: Option<u64>,
    ) -> ValidationResult<u64> {
        let parsed = value.parse::<u64>().map_err(|_| {
            invalid(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid unsigned integer format",
                "Use a valid positive integer number",
            )
        })?;

        if let Some(min) = min {
            if parsed < min {
                return Err(invalid(
                    field,
                    value,
                    ConfigErrorType::InvalidRange,
                    format!("Value {} is below minimum {}", parsed, min),
                    format!("Use a value >= {}", min),
                ));
            }
        }

        if let Some(max) = max {
            if parsed > max {
                return Err(invalid(
                    field,
                    value,
                    ConfigErrorType::InvalidRange,
                    format!("Value {} is above maximum {}", parsed, max),
                    format!("Use a value <= {}", max),
                ));
            }
        }

        Ok(parsed)
    }

    /// Validate enumerated values (case-insensitive)
    pub fn validate_enum(
        field: &str,
        value: &str,
        valid_values: &[&str],
    ) -> ValidationResult<String> {
        let lowered = value.to_lowercase();
        if valid_values.iter().any(|v| v.to_lowercase() == lowered) {
            Ok(lowered)
        } else {
            Err(invalid(
                field,
                value,
                ConfigErrorType::InvalidValue,
                format!("Invalid value, must be one of: {}", valid_values.join(", ")),
                format!("Use one of: {}", valid_values.join(", ")),
            ))
        }
    }

    /// Validate IP address
    pub fn validate_ip_address(field: &str, value: &str) -> ValidationResult<IpAddr> {
        IpAddr::from_str(value).map_err(|_| {
            invalid(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid IP address format",
                "Use a valid IPv4 or IPv6 address (e.g., 127.0.0.1 or ::1)",
            )
        })
    }

    /// Validate port number
    pub fn validate_port(field: &str, value: &str) -> ValidationResult<u16> {
        let port = value.parse::<u16>().map_err(|_| {
            invalid(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid port number format",
                "Use a number between 1 and 65535",
            )
        })?;

        if port == 0 {
            return Err(invalid(
                field,
                value,
                ConfigErrorType::InvalidRange,
                "Port number cannot be 0",
                "Use a port between 1 and 65535",
            ));
        }

        Ok(port)
    }

    /// Validate that a file path points to an existing file
    pub fn validate_file_exists(field: &str, value: &str) -> ValidationResult<String> {
        let path = Path::new(value);
        if !path.is_file() {
            return Err(invalid(
                field,
                value,
                ConfigErrorType::FileNotFound,
                "File does not exist",
                "Ensure the file exists and the path is correct",
            ));
        }
        Ok(value.to_string())
    }
}

/// Schema-driven validator over [`CONFIG_PARAMS`]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate every registered parameter against the process environment
    pub fn validate_all() -> ValidationResults {
        let results = Self::validate_with(|name| env::var(name).ok(), |_| true);
        results.print_summary();
        results
    }

    /// Quick validation for critical parameters only (fail-fast)
    pub fn validate_critical() -> Result<(), ValidationResults> {
        info!("Running critical configuration validation...");
        let results = Self::validate_with(
            |name| env::var(name).ok(),
            |param| param.validation_level == ValidationLevel::Critical,
        );

        if results.is_valid() {
            Ok(())
        } else {
            results.print_summary();
            Err(results)
        }
    }

    /// Validate the parameters selected by `filter`, reading values through `lookup`
    pub fn validate_with<L, F>(lookup: L, filter: F) -> ValidationResults
    where
        L: Fn(&str) -> Option<String>,
        F: Fn(&ConfigParam) -> bool,
    {
        let mut results = ValidationResults::new();

        for param in CONFIG_PARAMS.iter().filter(|p| filter(p)) {
            let value = lookup(param.name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| param.default_value.map(String::from));

            let Some(value) = value else {
                continue;
            };

            if let Err(error) = Self::validate_parameter(param, &value) {
                results.add(param.validation_level, error);
            }
        }

        results
    }

    /// Validate a single parameter value according to its registered type
    pub fn validate_parameter(param: &ConfigParam, value: &str) -> ValidationResult<()> {
        match param.param_type {
            ConfigType::String => Ok(()),
            ConfigType::UnsignedInteger => {
                validators::validate_unsigned(param.name, value, param.min_value, param.max_value)
                    .map(|_| ())
            }
            ConfigType::Boolean => validators::validate_boolean(param.name, value).map(|_| ()),
            ConfigType::IpAddress => validators::validate_ip_address(param.name, value).map(|_| ()),
            ConfigType::Port => validators::validate_port(param.name, value).map(|_| ()),
            ConfigType::FilePath => validators::validate_file_exists(param.name, value).map(|_| ()),
            ConfigType::Enum(valid_values) => {
                validators::validate_enum(param.name, value, valid_values).map(|_| ())
            }
        }
    }

    /// Generate a sample configuration file with all parameters and descriptions
    pub fn generate_sample_config() -> String {
        let mut output = String::new();
        output.push_str("# Transcribe API Configuration File\n");
        output.push_str("# Environment variables with the same name take precedence\n\n");

        for param in CONFIG_PARAMS {
            output.push_str(&format!("# {}\n", param.description));
            let value = param.default_value.unwrap_or("");
            match param.param_type {
                ConfigType::UnsignedInteger | ConfigType::Port | ConfigType::Boolean => {
                    output.push_str(&format!("{} = {}\n\n", param.name, value));
                }
                _ => output.push_str(&format!("{} = \"{}\"\n\n", param.name, value)),
            }
        }
        output
    }
}
