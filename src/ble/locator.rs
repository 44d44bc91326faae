//! # Device Locator
//!
//! One-shot discovery of the configured target peripheral.

use std::time::Duration;

use tracing::{info, warn};

use super::{DeviceDescriptor, Transport};
use crate::error::{LoggerError, Result};

/// Scans for peripherals and picks the target by identifier
///
/// Stateless between calls: every [`DeviceLocator::discover`] runs a fresh scan.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLocator {
    scan_timeout: Duration,
}

impl DeviceLocator {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }

    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    /// Scan once and return the descriptor whose identifier matches `target`
    ///
    /// When the target is missing (or none is configured) every discovered
    /// device is reported so the operator can pick the right address.
    ///
    /// # Errors
    ///
    /// - [`LoggerError::Discovery`] if the scan itself fails
    /// - [`LoggerError::NoTarget`] if `target` is `None` or empty
    /// - [`LoggerError::DeviceNotFound`] if no discovered device matches
    pub async fn discover<T>(&self, transport: &T, target: Option<&str>) -> Result<DeviceDescriptor>
    where
        T: Transport + ?Sized,
    {
        let target = target.map(str::trim).filter(|t| !t.is_empty());
        match target {
            Some(t) => info!("Scanning for IMU device with address: {}...", t),
            None => info!("Scanning for BLE devices..."),
        }

        let devices = transport.scan(self.scan_timeout).await?;

        let Some(target) = target else {
            warn!("No target device configured");
            report_discovered(&devices);
            return Err(LoggerError::NoTarget {
                discovered: devices,
            });
        };

        match select_target(&devices, target) {
            Some(device) => {
                info!("Found target device: {}", device);
                Ok(device.clone())
            }
            None => {
                warn!("Target device {} not found", target);
                report_discovered(&devices);
                Err(LoggerError::DeviceNotFound {
                    target: target.to_string(),
                    discovered: devices,
                })
            }
        }
    }
}

/// First device whose identifier equals `target`, ignoring case
pub fn select_target<'a>(
    devices: &'a [DeviceDescriptor],
    target: &str,
) -> Option<&'a DeviceDescriptor> {
    devices.iter().find(|d| d.matches(target))
}

/// Log every discovered device, numbered from 1
pub fn report_discovered(devices: &[DeviceDescriptor]) {
    if devices.is_empty() {
        info!("No BLE devices discovered");
        return;
    }

    info!("Available devices:");
    for (i, device) in devices.iter().enumerate() {
        let rssi = device
            .signal_strength
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "{}. Name: {}  Address: {}  RSSI: {}",
            i + 1,
            device.name_or_unknown(),
            device.identifier,
            rssi
        );
    }
}
