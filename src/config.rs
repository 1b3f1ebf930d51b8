//! Configuration System using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults (every section is optional)
//! 2. A TOML file (by default `config/thermolog.toml`, silently skipped if absent)
//! 3. Environment variables prefixed with `THERMOLOG_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use thermolog::config::MonitorConfig;
//!
//! let config = MonitorConfig::load()?;
//! println!("Reading from {}", config.device.port_or_default());
//! # Ok::<(), thermolog::error::MonitorError>(())
//! ```

use crate::aggregation::RetentionPolicy;
use crate::error::{AppResult, MonitorError};
use chrono::TimeDelta;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/thermolog.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial device settings
    pub device: DeviceConfig,
    /// Frame parsing settings
    pub parser: ParserConfig,
    /// Log file locations
    pub storage: StorageConfig,
    /// Retention windows
    pub retention: RetentionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "thermolog".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3"); platform default when unset
    pub port: Option<String>,
    /// Baud rate (e.g., 9600, 115200)
    pub baud_rate: u32,
    /// Read timeout; bounds how long `stop()` waits on a silent device
    pub read_timeout_ms: u64,
    /// Single-byte frame terminator
    pub terminator: String,
    /// Frames longer than this are discarded whole
    pub max_frame_len: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 100,
            terminator: "\n".to_string(),
            max_frame_len: 4096,
        }
    }
}

impl DeviceConfig {
    /// Configured port, or the platform default.
    pub fn port_or_default(&self) -> String {
        self.port.clone().unwrap_or_else(|| default_device_path().to_string())
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// The terminator byte. Only meaningful after [`MonitorConfig::validate`].
    pub fn terminator_byte(&self) -> u8 {
        self.terminator.as_bytes().first().copied().unwrap_or(b'\n')
    }
}

/// Frame parsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Marker preceding the temperature field
    pub marker: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            marker: "TEMP:".to_string(),
        }
    }
}

/// Log file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the three logs
    pub output_dir: PathBuf,
    /// Raw measurement log (last 24 hours by default)
    pub raw_file: String,
    /// Hourly average log (last month by default)
    pub hourly_file: String,
    /// Daily average log (last year by default)
    pub daily_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            raw_file: "temperature_measurements.log".to_string(),
            hourly_file: "hourly_averages.log".to_string(),
            daily_file: "daily_averages.log".to_string(),
        }
    }
}

impl StorageConfig {
    /// Full path of the raw log.
    pub fn raw_path(&self) -> PathBuf {
        self.output_dir.join(&self.raw_file)
    }

    /// Full path of the hourly log.
    pub fn hourly_path(&self) -> PathBuf {
        self.output_dir.join(&self.hourly_file)
    }

    /// Full path of the daily log.
    pub fn daily_path(&self) -> PathBuf {
        self.output_dir.join(&self.daily_file)
    }
}

/// Retention window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Raw series window in hours
    pub raw_hours: u32,
    /// Hourly series window in days
    pub hourly_days: u32,
    /// Daily series window in days
    pub daily_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_hours: 24,
            hourly_days: 30,
            daily_days: 365,
        }
    }
}

impl RetentionConfig {
    /// Convert to the policy used by the engine and the logger.
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            raw: TimeDelta::hours(i64::from(self.raw_hours)),
            hourly: TimeDelta::days(i64::from(self.hourly_days)),
            daily: TimeDelta::days(i64::from(self.daily_days)),
        }
    }
}

/// Platform default device when none is configured.
pub fn default_device_path() -> &'static str {
    if cfg!(windows) {
        "COM3"
    } else {
        "/dev/ttyS0"
    }
}

impl MonitorConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    ///
    /// Environment variables override the file with prefix `THERMOLOG_`.
    /// Example: `THERMOLOG_DEVICE__BAUD_RATE=115200`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(MonitorConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("THERMOLOG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.device.baud_rate == 0 {
            return Err(MonitorError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.device.terminator.len() != 1 {
            return Err(MonitorError::Configuration(format!(
                "terminator must be exactly one byte, got {:?}",
                self.device.terminator
            )));
        }

        if self.device.max_frame_len == 0 {
            return Err(MonitorError::Configuration(
                "max_frame_len must be greater than zero".to_string(),
            ));
        }

        if self.parser.marker.is_empty() {
            return Err(MonitorError::Configuration(
                "parser marker must not be empty".to_string(),
            ));
        }

        let retention = &self.retention;
        if retention.raw_hours == 0 || retention.hourly_days == 0 || retention.daily_days == 0 {
            return Err(MonitorError::Configuration(
                "retention windows must be greater than zero".to_string(),
            ));
        }

        let files = [
            &self.storage.raw_file,
            &self.storage.hourly_file,
            &self.storage.daily_file,
        ];
        if files[0] == files[1] || files[0] == files[2] || files[1] == files[2] {
            return Err(MonitorError::Configuration(
                "raw, hourly and daily logs must be distinct files".to_string(),
            ));
        }

        Ok(())
    }
}
