//! # Notification Decoder
//!
//! Turns one raw BLE notification payload into a [`SampleRecord`].
//!
//! The peripheral sends UTF-8 JSON objects of the form:
//!
//! ```text
//! {
//!   "timestamp": "t1" | 123,
//!   "device_id": "...",                     (optional)
//!   "accel":  {"x": 1, "y": 2, "z": 3},
//!   "gyro":   {"x": 0, "y": 0, "z": 0},
//!   "angles": {"roll": 0.5, "pitch": -0.2}
//! }
//! ```
//!
//! Decoding never panics: every failure comes back as a [`DecodeError`].

use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use super::types::{Angles, Axes, SampleRecord, Timestamp};

/// Maximum number of payload characters kept in a [`DecodeError`]
pub const PAYLOAD_PREVIEW_CHARS: usize = 64;

/// A payload that could not be turned into a sample
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail} (payload: {payload})")]
pub struct DecodeError {
    /// Offending payload, lossy UTF-8, truncated to [`PAYLOAD_PREVIEW_CHARS`]
    pub payload: String,
    /// Parser detail
    pub detail: String,
}

impl DecodeError {
    fn new(raw: &[u8], detail: impl Into<String>) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut payload: String = text.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        if text.chars().count() > PAYLOAD_PREVIEW_CHARS {
            payload.push_str("...");
        }
        Self {
            payload,
            detail: detail.into(),
        }
    }
}

#[derive(Deserialize)]
struct WireSample {
    timestamp: Box<RawValue>,
    #[serde(default)]
    device_id: Option<String>,
    accel: WireAxes,
    gyro: WireAxes,
    angles: WireAngles,
}

#[derive(Deserialize)]
struct WireAxes {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct WireAngles {
    roll: f64,
    pitch: f64,
}

/// Decodes notification payloads for one session
///
/// Holds the identifier used as `device_id` when the payload omits it.
#[derive(Debug, Clone)]
pub struct NotificationDecoder {
    default_device_id: String,
}

impl NotificationDecoder {
    /// Create a decoder that falls back to `default_device_id`
    pub fn new(default_device_id: impl Into<String>) -> Self {
        Self {
            default_device_id: default_device_id.into(),
        }
    }

    /// Device id substituted when a payload carries none
    pub fn default_device_id(&self) -> &str {
        &self.default_device_id
    }

    /// Decode one notification payload
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not UTF-8, not a JSON object,
    /// misses a required key, or carries a non-numeric or out-of-range value in
    /// a numeric field.
    pub fn decode(&self, raw: &[u8]) -> Result<SampleRecord, DecodeError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| DecodeError::new(raw, format!("payload is not UTF-8: {}", e)))?;

        // Some firmwares pad notifications with NULs up to the MTU
        let text = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());

        let wire: WireSample =
            serde_json::from_str(text).map_err(|e| DecodeError::new(raw, e.to_string()))?;

        let timestamp = parse_timestamp(&wire.timestamp).map_err(|d| DecodeError::new(raw, d))?;

        let accel = Axes::new(wire.accel.x, wire.accel.y, wire.accel.z);
        let gyro = Axes::new(wire.gyro.x, wire.gyro.y, wire.gyro.z);
        let angles = Angles::new(wire.angles.roll, wire.angles.pitch);

        Ok(SampleRecord {
            timestamp,
            device_id: wire
                .device_id
                .unwrap_or_else(|| self.default_device_id.clone()),
            accel,
            gyro,
            angles,
        })
    }
}

fn parse_timestamp(raw: &RawValue) -> std::result::Result<Timestamp, String> {
    let literal = raw.get();

    if literal.starts_with('"') {
        return serde_json::from_str::<String>(literal)
            .map(Timestamp::Text)
            .map_err(|e| format!("invalid timestamp string: {}", e));
    }

    match serde_json::from_str::<serde_json::Number>(literal) {
        Ok(_) => Ok(Timestamp::Numeric(literal.to_string())),
        Err(_) => Err(format!(
            "timestamp must be a string or number, got {}",
            literal
        )),
    }
}
