//! # BLE Module
//!
//! Everything between the IMU logger and the radio.
//!
//! This module handles:
//! - Describing discovered peripherals ([`DeviceDescriptor`])
//! - The transport abstraction the session drives ([`Transport`])
//! - Locating the configured target peripheral ([`locator::DeviceLocator`])
//! - The production `btleplug` transport ([`btle::BtleTransport`])

pub mod btle;
pub mod locator;
pub mod transport;

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

pub use locator::DeviceLocator;
pub use transport::Transport;

/// Default notify characteristic (Nordic UART Service TX)
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    uuid::uuid!("6E400003-B5A3-F393-E0A9-E50E24DCCA9E");

/// A peripheral seen during one discovery scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Transport-level address (MAC on Linux/Windows, UUID on macOS)
    pub identifier: String,
    /// Advertised local name
    pub display_name: Option<String>,
    /// RSSI in dBm
    pub signal_strength: Option<i16>,
}

impl DeviceDescriptor {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            signal_strength: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.signal_strength = Some(rssi);
        self
    }

    /// Case-insensitive identifier comparison
    pub fn matches(&self, identifier: &str) -> bool {
        self.identifier.eq_ignore_ascii_case(identifier)
    }

    /// Display name, or `Unknown`
    pub fn name_or_unknown(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name_or_unknown(), self.identifier)
    }
}

/// One event pushed by the transport while a subscription is live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Raw notification value, in delivery order
    Payload(Bytes),
    /// The link dropped; no further payloads will arrive
    Lost(String),
}
