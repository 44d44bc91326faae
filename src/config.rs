//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::ble::DEFAULT_CHARACTERISTIC_UUID;
use crate::error::{LoggerError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target peripheral configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Address of the peripheral to log; empty = list devices and stop
    #[serde(default)]
    pub target: String,

    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,

    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

/// Reconnect behaviour
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    #[serde(default)]
    pub rediscover_after_failures: u32,

    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

/// Reconnect delay policy
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Exponential,
}

/// CSV output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

/// Operator log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily-rolling log file; console only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_characteristic_uuid() -> String { format!("{:X}", DEFAULT_CHARACTERISTIC_UUID) }
fn default_scan_timeout_ms() -> u64 { 5000 }

fn default_backoff() -> BackoffKind { BackoffKind::Constant }
fn default_reconnect_interval_ms() -> u64 { 3000 }
fn default_max_backoff_ms() -> u64 { 30000 }
fn default_connect_timeout_ms() -> u64 { 10000 }
fn default_progress_interval() -> u64 { 100 }
fn default_notification_buffer() -> usize { 256 }

fn default_output_dir() -> String { ".".to_string() }
fn default_file_prefix() -> String { "ESP_32C3".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            characteristic_uuid: default_characteristic_uuid(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: default_backoff(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            progress_interval: default_progress_interval(),
            rediscover_after_failures: 0,
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imu_logger::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::InvalidConfig`] if any value is out of its valid range
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(LoggerError::InvalidConfig(msg.into()))
        }

        if uuid::Uuid::parse_str(&self.device.characteristic_uuid).is_err() {
            return invalid(format!(
                "characteristic_uuid '{}' is not a valid UUID",
                self.device.characteristic_uuid
            ));
        }

        if self.device.scan_timeout_ms == 0 || self.device.scan_timeout_ms > 60000 {
            return invalid("scan_timeout_ms must be between 1 and 60000");
        }

        if self.session.reconnect_interval_ms == 0 || self.session.reconnect_interval_ms > 60000 {
            return invalid("reconnect_interval_ms must be between 1 and 60000");
        }

        if self.session.max_backoff_ms < self.session.reconnect_interval_ms {
            return invalid("max_backoff_ms must be at least reconnect_interval_ms");
        }

        if self.session.connect_timeout_ms == 0 || self.session.connect_timeout_ms > 120000 {
            return invalid("connect_timeout_ms must be between 1 and 120000");
        }

        if self.session.progress_interval == 0 {
            return invalid("progress_interval must be greater than 0");
        }

        if self.session.notification_buffer == 0 {
            return invalid("notification_buffer must be greater than 0");
        }

        if self.sink.output_dir.is_empty() {
            return invalid("sink output_dir cannot be empty");
        }

        if self.sink.file_prefix.is_empty() {
            return invalid("sink file_prefix cannot be empty");
        }

        if self.sink.file_prefix.contains(['/', '\\']) {
            return invalid("sink file_prefix cannot contain path separators");
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return invalid(format!("logging level '{}' is not a valid filter", self.logging.level));
        }

        Ok(())
    }
}
