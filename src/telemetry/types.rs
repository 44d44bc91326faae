//! # Telemetry Types
//!
//! The validated unit of IMU telemetry produced by the decoder and consumed
//! by the log sink.

use std::fmt;

/// Sample timestamp exactly as the peripheral sent it.
///
/// The peripheral may send either a JSON string or a JSON number. Numbers are
/// kept as their literal source text so `1.50` is never rewritten as `1.5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    /// JSON string, unescaped
    Text(String),
    /// JSON number, literal source text
    Numeric(String),
}

impl Timestamp {
    /// Text as it will be written to the record store
    pub fn as_str(&self) -> &str {
        match self {
            Timestamp::Text(s) | Timestamp::Numeric(s) => s,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-axis reading (accelerometer or gyroscope)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Axes {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation derived on the peripheral, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angles {
    pub roll: f64,
    pub pitch: f64,
}

impl Angles {
    pub fn new(roll: f64, pitch: f64) -> Self {
        Self { roll, pitch }
    }
}

/// One decoded IMU sample
///
/// Only built by [`crate::telemetry::decoder::NotificationDecoder`], which
/// guarantees every numeric field is present and finite (JSON has no NaN and
/// serde_json rejects out-of-range numbers).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub timestamp: Timestamp,
    pub device_id: String,
    pub accel: Axes,
    pub gyro: Axes,
    pub angles: Angles,
}
