// Configuration loader for Transcribe API
//
// This module handles loading configuration from the TOML configuration file
// and environment variables with appropriate precedence.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use toml::Value;

const CONFIG_FILE_PATH: &str = "transcribe_api.conf";

/// Loads configuration from the default TOML file into the environment
///
/// Configuration precedence (highest to lowest):
/// 1. Environment variables
/// 2. Configuration file values
/// 3. Default values (application defaults in `config::defaults`)
///
/// Returns true if the config file was successfully loaded, false otherwise
pub fn load_config() -> bool {
    load_config_from(Path::new(CONFIG_FILE_PATH))
}

/// Same as [`load_config`] with an explicit file location
pub fn load_config_from(config_path: &Path) -> bool {
    if !config_path.exists() {
        debug!("Configuration file not found at: {}", config_path.display());
        return false;
    }

    let config_content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read configuration file: {}", e);
            return false;
        }
    };

    let config_map = match flatten_config(&config_content) {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to parse configuration file: {}", e);
            return false;
        }
    };

    for (key, value) in config_map {
        if env::var(&key).is_err() {
            debug!("Setting env var from config file: {}", key);
            env::set_var(key, value);
        } else {
            debug!("Env var already exists, skipping: {}", key);
        }
    }

    info!("Configuration loaded from {}", config_path.display());
    true
}

/// Parses a flat TOML document into string key-value pairs
///
/// Nested tables and arrays are skipped with a warning.
fn flatten_config(content: &str) -> Result<HashMap<String, String>, toml::de::Error> {
    let config_values: Value = content.parse()?;
    let mut config_map = HashMap::new();

    if let Value::Table(table) = config_values {
        for (key, value) in table {
            match value {
                Value::String(s) => {
                    config_map.insert(key, s);
                }
                Value::Integer(i) => {
                    config_map.insert(key, i.to_string());
                }
                Value::Float(f) => {
                    config_map.insert(key, f.to_string());
                }
                Value::Boolean(b) => {
                    config_map.insert(key, b.to_string());
                }
                _ => {
                    warn!("Skipping unsupported TOML value type for key: {}", key);
                }
            }
        }
    }

    Ok(config_map)
}
