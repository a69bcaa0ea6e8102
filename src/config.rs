//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::scan::TimeAxis;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Only files whose path contains one of these strings are used
    #[serde(default)]
    pub match_strings: Vec<String>,

    /// Keep only the latest N files (0 = all)
    #[serde(default)]
    pub max_files: usize,

    /// Order files by the timestamp of their first event instead of by name
    #[serde(default = "default_sort_by_time")]
    pub sort_by_time: bool,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_sort_by_time() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            match_strings: Vec::new(),
            max_files: 0,
            sort_by_time: default_sort_by_time(),
        }
    }
}

/// Defaults for range scans and for waiting on background scans
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_step")]
    pub step: u64,

    #[serde(default)]
    pub array_position: i32,

    #[serde(default = "default_time_axis")]
    pub time_axis: TimeAxis,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Request a stop if a scan runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_step() -> u64 {
    1
}

fn default_time_axis() -> TimeAxis {
    TimeAxis::On
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            array_position: 0,
            time_axis: default_time_axis(),
            poll_interval_ms: default_poll_interval(),
            timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Map a numeric verbosity (0 = debug, 1 = info, else error) to a level
    pub fn level_from_verbosity(verbosity: u8) -> &'static str {
        match verbosity {
            0 => "debug",
            1 => "info",
            _ => "error",
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tracescan").join("config.toml")),
            Some(PathBuf::from("./tracescan.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("TRACESCAN_DATA_DIR") {
            self.store.data_dir = data_dir;
        }

        if let Ok(step) = std::env::var("TRACESCAN_STEP") {
            if let Ok(s) = step.parse() {
                self.scan.step = s;
            }
        }

        if let Ok(level) = std::env::var("TRACESCAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRACESCAN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tracescan Configuration
#
# Environment variables override these settings:
# - TRACESCAN_DATA_DIR
# - TRACESCAN_STEP
# - TRACESCAN_LOG_LEVEL
# - TRACESCAN_LOG_FORMAT

[store]
# Directory holding the JSON segment files
data_dir = "./data"

# Only use files whose path contains one of these strings (empty = all)
match_strings = []

# Keep only the latest N files (0 = all)
max_files = 0

# Order files by the timestamp of their first event instead of by name
sort_by_time = true

[scan]
# Step between visited events in range scans
step = 1

# Array reduction: >= 0 element, -1 mean, -2 max, -3 min
array_position = 0

# x axis of traces: off (event index), on (timestamp), auto (timestamp for scalars)
time_axis = "on"

# How often to poll a running scan (ms)
poll_interval_ms = 100

# Stop scans that run longer than this (seconds)
# timeout_secs = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty or json
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.store.data_dir, "./data");
        assert!(config.store.sort_by_time);
        assert_eq!(config.scan.step, 1);
        assert_eq!(config.scan.time_axis, TimeAxis::On);
        assert_eq!(config.scan.timeout_secs, None);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            step = 10
            time_axis = "auto"
            array_position = -1
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.step, 10);
        assert_eq!(config.scan.time_axis, TimeAxis::Auto);
        assert_eq!(config.scan.array_position, -1);
        assert_eq!(config.scan.poll_interval_ms, 100);
        assert_eq!(config.store.max_files, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[scan\nstep = ").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nmax_files = 3\nmatch_strings = [\"llrf\"]\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store.max_files, 3);
        assert_eq!(config.store.match_strings, vec!["llrf".to_string()]);
    }

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(LoggingConfig::level_from_verbosity(0), "debug");
        assert_eq!(LoggingConfig::level_from_verbosity(1), "info");
        assert_eq!(LoggingConfig::level_from_verbosity(2), "error");
        assert_eq!(LoggingConfig::level_from_verbosity(7), "error");
    }
}
