//! # Error Types
//!
//! Custom error types for the IMU logger using `thiserror`.

use thiserror::Error;

use crate::ble::DeviceDescriptor;

/// Main error type for the IMU logger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but a value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors (sink storage, config file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The discovery scan itself failed (adapter missing, radio off, ...)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Scan succeeded but the target peripheral was not among the results
    #[error("Device {target} not found ({} other device(s) visible)", .discovered.len())]
    DeviceNotFound {
        target: String,
        discovered: Vec<DeviceDescriptor>,
    },

    /// No target identifier configured
    #[error("No target device configured ({} device(s) visible)", .discovered.len())]
    NoTarget { discovered: Vec<DeviceDescriptor> },

    /// Connect or subscribe failed, or the link dropped while streaming
    #[error("Connection error: {0}")]
    Connection(String),

    /// `append` called on a sink that was already closed
    #[error("Log sink is closed")]
    SinkClosed,

    /// Transport collaborator reported a failure outside connect/subscribe
    #[error("Transport error: {0}")]
    Transport(String),
}

impl LoggerError {
    /// Whether this error must end the run instead of triggering a reconnect.
    ///
    /// Only sink storage failures and the append-after-close invariant are
    /// fatal; everything the radio can throw at us is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoggerError::Io(_) | LoggerError::SinkClosed)
    }
}

/// Result type alias for the IMU logger
pub type Result<T> = std::result::Result<T, LoggerError>;
