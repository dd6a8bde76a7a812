// Transcribe API configuration
//
// This module contains configuration structures and constants for the Transcribe API.
// It centralizes all configuration parameters and provides defaults from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default values for configuration
pub mod defaults {
    // Server bind address
    pub const HOST: &str = "127.0.0.1";
    pub const PORT: u16 = 8181;

    // Client disconnect timeout and keep-alive, in seconds
    pub const TIMEOUT_SECONDS: u64 = 480;
    pub const KEEPALIVE_SECONDS: u64 = 480;

    // Max request body (512MB)
    pub const MAX_FILE_SIZE: usize = 536_870_912;

    // Scratch directory for transcoding artifacts
    pub const SCRATCH_DIR: &str = "/tmp/audioconversion";

    // External transcoder executable
    pub const FFMPEG_CMD: &str = "ffmpeg";

    // Model file loaded at startup
    pub const MODEL_PATH: &str = "models/ggml-base.bin";

    pub const DEVICE: &str = "auto";
    pub const DEVICE_INDEX: u32 = 0;
    pub const BEAM_SIZE: u32 = 5;

    // Only one inference runs at a time, extra workers only buy isolation
    pub const WORKER_POOL_SIZE: usize = 1;

    // Release engine caches after every job
    pub const RECLAIM_INTERVAL: u64 = 1;

    // 0 disables the overall request deadline
    pub const REQUEST_DEADLINE_SECONDS: u64 = 0;

    pub const METRICS_BACKEND: &str = "prometheus";
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Boolean env var, accepting the same spellings as the config validator
fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .and_then(|s| crate::config_validator::validators::validate_boolean(key, s.trim()).ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// HTTP server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client_timeout: Duration,
    pub keep_alive: Duration,
    /// Number of actix workers, 0 means one per CPU core
    pub workers: usize,
    /// Largest accepted request body in bytes
    pub max_body_size: usize,
    pub api_version: String,
    pub frontend_version: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env_non_empty("TRANSCRIBE_API_HOST").unwrap_or_else(|| defaults::HOST.to_string()),
            port: env_parsed("TRANSCRIBE_API_PORT").unwrap_or(defaults::PORT),
            client_timeout: Duration::from_secs(
                env_parsed("TRANSCRIBE_API_TIMEOUT").unwrap_or(defaults::TIMEOUT_SECONDS),
            ),
            keep_alive: Duration::from_secs(
                env_parsed("TRANSCRIBE_API_KEEPALIVE").unwrap_or(defaults::KEEPALIVE_SECONDS),
            ),
            workers: env_parsed("HTTP_WORKER_NUMBER").unwrap_or(0),
            max_body_size: env_parsed("MAX_FILE_SIZE").unwrap_or(defaults::MAX_FILE_SIZE),
            api_version: env_non_empty("TRANSCRIBE_API_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            frontend_version: env_non_empty("TRANSCRIBE_FRONTEND_VERSION"),
        }
    }
}

impl ServerConfig {
    /// Worker count handed to actix, resolving 0 to the number of CPU cores
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Compute device the engine is loaded on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
    /// Use an accelerator when the backend was built with one
    Auto,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "auto" => Ok(Device::Auto),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::Auto => write!(f, "auto"),
        }
    }
}

/// Settings for the single engine instance built at startup
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model_path: String,
    pub device: Device,
    pub device_index: u32,
    /// Language hint, `None` lets the engine detect it
    pub language: Option<String>,
    /// Inference threads, 0 means one per CPU core
    pub threads: usize,
    pub beam_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: env_non_empty("TRANSCRIBE_MODEL_PATH")
                .unwrap_or_else(|| defaults::MODEL_PATH.to_string()),
            device: env_parsed("TRANSCRIBE_DEVICE").unwrap_or(Device::Auto),
            device_index: env_parsed("TRANSCRIBE_DEVICE_INDEX").unwrap_or(defaults::DEVICE_INDEX),
            language: env_non_empty("TRANSCRIBE_LANGUAGE").filter(|l| l != "auto"),
            threads: env_parsed("TRANSCRIBE_THREADS").unwrap_or(0),
            beam_size: env_parsed("TRANSCRIBE_BEAM_SIZE").unwrap_or(defaults::BEAM_SIZE),
        }
    }
}

impl EngineConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

/// Settings for the transcription pipeline
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory holding per-job transcoding artifacts
    pub scratch_dir: String,
    /// Path or name of the ffmpeg executable
    pub ffmpeg_command: String,
    /// Background workers running inference
    pub worker_pool_size: usize,
    /// Release engine caches every N jobs, 0 never releases
    pub reclaim_interval: u64,
    /// Overall deadline for one request, `None` waits indefinitely
    pub request_deadline: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let deadline_seconds: u64 = env_parsed("TRANSCRIBE_REQUEST_DEADLINE_SECONDS")
            .unwrap_or(defaults::REQUEST_DEADLINE_SECONDS);

        Self {
            scratch_dir: env_non_empty("TRANSCRIBE_SCRATCH_DIR")
                .unwrap_or_else(|| defaults::SCRATCH_DIR.to_string()),
            ffmpeg_command: env_non_empty("TRANSCRIBE_FFMPEG_CMD")
                .unwrap_or_else(|| defaults::FFMPEG_CMD.to_string()),
            worker_pool_size: env_parsed::<usize>("TRANSCRIBE_WORKER_POOL_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults::WORKER_POOL_SIZE),
            reclaim_interval: env_parsed("TRANSCRIBE_RECLAIM_INTERVAL")
                .unwrap_or(defaults::RECLAIM_INTERVAL),
            request_deadline: (deadline_seconds > 0).then(|| Duration::from_secs(deadline_seconds)),
        }
    }
}

impl PipelineConfig {
    /// Ensures the scratch directory exists
    pub fn ensure_scratch_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)
    }
}

/// Bearer-token gate in front of the transcription routes
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub tokens: Vec<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let tokens = env::var("TRANSCRIBE_API_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            enabled: env_flag("ENABLE_AUTHORIZATION").unwrap_or(false),
            tokens,
        }
    }
}

/// Configuration for metrics collection and export
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Type of metrics exporter ("prometheus", "none", "null", "disabled")
    pub exporter_type: String,
    /// Optional prefix for every metric name
    pub namespace: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let metrics_enabled = env_flag("TRANSCRIBE_API_METRICS_ENABLED").unwrap_or(true);

        let exporter_type = if !metrics_enabled {
            "disabled".to_string()
        } else {
            env_non_empty("TRANSCRIBE_API_METRICS_BACKEND")
                .or_else(|| env_non_empty("METRICS_BACKEND"))
                .unwrap_or_else(|| defaults::METRICS_BACKEND.to_string())
        };

        Self {
            exporter_type,
            namespace: env_non_empty("PROMETHEUS_NAMESPACE"),
        }
    }
}
