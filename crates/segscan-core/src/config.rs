//! `SegScan` Configuration Module
//!
//! Provides configuration file support via `segscan.toml`, environment variables,
//! and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (per-call `QueryOptions`, `SessionOptions`)
//! 2. Environment variables (`SEGSCAN_*`, nested keys separated by `__`)
//! 3. Configuration file (`segscan.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::storage::NullSentinels;
use crate::writer::WriteMode;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Storage configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding segment files.
    pub data_dir: String,
    /// Logical database name, mixed into every header checksum.
    pub db_name: String,
    /// File extension for segment files (without the dot).
    pub file_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./segscan_data".to_string(),
            db_name: "default".to_string(),
            file_extension: "seg".to_string(),
        }
    }
}

/// Scan configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Overlay uncommitted (locked) writes onto scan results by default.
    pub read_dirty: bool,
}

/// Writer configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Total retry budget for queued positions at commit, in milliseconds.
    pub retry_timeout_ms: u64,
    /// Polling interval between lock re-attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Mode for sessions opened without explicit options.
    pub default_mode: WriteMode,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            retry_timeout_ms: 3000,
            retry_interval_ms: 500,
            default_mode: WriteMode::Online,
        }
    }
}

impl WriterConfig {
    /// Retry budget as a `Duration`.
    #[must_use]
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// Retry polling interval as a `Duration`.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Query orchestration defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of sub-ranges a column's record range is split into, and the
    /// number of columns scanned concurrently.
    pub file_parallelism: usize,
    /// Maximum sub-range scans in flight per column.
    pub segment_parallelism: usize,
    /// Scan columns concurrently instead of one after another.
    pub concurrent_columns: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            file_parallelism: cpus.clamp(1, 8),
            segment_parallelism: 4,
            concurrent_columns: true,
        }
    }
}

/// Logging configuration section.
///
/// The library only emits `tracing` events; host processes read this section
/// when installing their subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main `SegScan` configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Scan configuration.
    pub scan: ScanConfig,
    /// Writer configuration.
    pub writer: WriterConfig,
    /// Query configuration.
    pub query: QueryConfig,
    /// Per-encoding null sentinels.
    pub nulls: NullSentinels,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("segscan.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SEGSCAN_").split("__"));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a default configuration rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.as_ref().to_string_lossy().into_owned();
        config
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.db_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.db_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.storage.db_name.contains('|') {
            return Err(ConfigError::InvalidValue {
                key: "storage.db_name".to_string(),
                message: "must not contain '|'".to_string(),
            });
        }

        if self.writer.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "writer.retry_interval_ms".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        if self.writer.retry_interval_ms > self.writer.retry_timeout_ms {
            return Err(ConfigError::InvalidValue {
                key: "writer.retry_interval_ms".to_string(),
                message: format!(
                    "value {} exceeds writer.retry_timeout_ms ({})",
                    self.writer.retry_interval_ms, self.writer.retry_timeout_ms
                ),
            });
        }

        if !(1..=256).contains(&self.query.file_parallelism) {
            return Err(ConfigError::InvalidValue {
                key: "query.file_parallelism".to_string(),
                message: format!(
                    "value {} is out of range [1, 256]",
                    self.query.file_parallelism
                ),
            });
        }

        if !(1..=256).contains(&self.query.segment_parallelism) {
            return Err(ConfigError::InvalidValue {
                key: "query.segment_parallelism".to_string(),
                message: format!(
                    "value {} is out of range [1, 256]",
                    self.query.segment_parallelism
                ),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
