//! # btleplug Transport
//!
//! Production [`Transport`] on top of the platform BLE stack (BlueZ,
//! CoreBluetooth, WinRT) via `btleplug`.
//!
//! Notifications are forwarded by a spawned task into a bounded mpsc channel.
//! A second task watches the adapter for `DeviceDisconnected` so link loss is
//! reported even when the notification stream just goes quiet.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeviceDescriptor, LinkEvent, Transport};
use crate::error::{LoggerError, Result};

/// BLE transport bound to the first adapter of the host
pub struct BtleTransport {
    adapter: Adapter,
    connect_timeout: Duration,
    buffer: usize,
}

impl std::fmt::Debug for BtleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

/// One open peripheral connection and its forwarding tasks
pub struct BtleConnection {
    peripheral: Peripheral,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleTransport {
    /// Bind to the first Bluetooth adapter
    ///
    /// # Arguments
    ///
    /// * `connect_timeout` - Upper bound for connect and service discovery
    /// * `buffer` - Capacity of the notification channel
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Discovery`] if no Bluetooth stack or adapter is available
    pub async fn new(connect_timeout: Duration, buffer: usize) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| LoggerError::Discovery(format!("Bluetooth unavailable: {}", e)))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| LoggerError::Discovery(format!("Failed to list adapters: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| LoggerError::Discovery("No Bluetooth adapter found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter: {}", info);
        }

        Ok(Self {
            adapter,
            connect_timeout,
            buffer: buffer.max(1),
        })
    }

    async fn find_peripheral(&self, identifier: &str) -> Result<Peripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| LoggerError::Connection(format!("Failed to list peripherals: {}", e)))?;

        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                if peripheral_identifier(&peripheral, &props).eq_ignore_ascii_case(identifier) {
                    return Ok(peripheral);
                }
            }
        }

        Err(LoggerError::Connection(format!(
            "Peripheral {} is not known to the adapter",
            identifier
        )))
    }
}

/// MAC address where the platform exposes one, platform id otherwise (macOS)
fn peripheral_identifier(peripheral: &Peripheral, props: &PeripheralProperties) -> String {
    if cfg!(target_os = "macos") {
        peripheral.id().to_string()
    } else {
        props.address.to_string()
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Connection = BtleConnection;

    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| LoggerError::Discovery(format!("Failed to start scan: {}", e)))?;
        let scanning = ActiveScan::new(self.adapter.clone());

        tokio::time::sleep(timeout).await;
        scanning.stop().await;

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| LoggerError::Discovery(format!("Failed to list peripherals: {}", e)))?;

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            match peripheral.properties().await {
                Ok(Some(props)) => {
                    let identifier = peripheral_identifier(&peripheral, &props);
                    devices.push(DeviceDescriptor {
                        identifier,
                        display_name: props.local_name,
                        signal_strength: props.rssi,
                    });
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping peripheral without properties: {}", e),
            }
        }

        debug!("Scan finished: {} device(s)", devices.len());
        Ok(devices)
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<BtleConnection> {
        let peripheral = self.find_peripheral(&device.identifier).await?;

        // A dropped connect future does not cancel the request in the BLE stack,
        // and a link still being set up reports as disconnected
        let connected = match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("connect failed: {}", e)),
            Err(_) => Err(format!("connect timed out after {:?}", self.connect_timeout)),
        };
        if let Err(reason) = connected {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect after failed connect: {}", e);
            }
            return Err(LoggerError::Connection(reason));
        }

        let discovered =
            tokio::time::timeout(self.connect_timeout, peripheral.discover_services()).await;

        let connection = BtleConnection {
            peripheral,
            tasks: Vec::new(),
        };

        match discovered {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => {
                self.close(connection).await;
                Err(LoggerError::Connection(format!("service discovery failed: {}", e)))
            }
            Err(_) => {
                self.close(connection).await;
                Err(LoggerError::Connection(format!(
                    "service discovery timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }

    async fn subscribe(
        &self,
        connection: &mut BtleConnection,
        channel: Uuid,
    ) -> Result<mpsc::Receiver<LinkEvent>> {
        let peripheral = connection.peripheral.clone();

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == channel)
            .ok_or_else(|| LoggerError::Connection(format!("Characteristic {} not found", channel)))?;

        // Both streams are taken before subscribing so an early disconnect is seen
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| LoggerError::Transport(format!("adapter events unavailable: {}", e)))?;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| LoggerError::Connection(format!("notification stream unavailable: {}", e)))?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| LoggerError::Connection(format!("subscribe failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(self.buffer);

        let forward_tx = tx.clone();
        connection.tasks.push(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != channel {
                    continue;
                }
                let event = LinkEvent::Payload(Bytes::from(notification.value));
                if forward_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = forward_tx
                .send(LinkEvent::Lost("notification stream ended".to_string()))
                .await;
        }));

        let peripheral_id = peripheral.id();
        connection.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        let _ = tx.send(LinkEvent::Lost("device disconnected".to_string())).await;
                        return;
                    }
                }
            }
        }));

        Ok(rx)
    }

    async fn close(&self, connection: BtleConnection) {
        for task in &connection.tasks {
            task.abort();
        }

        release(&connection.peripheral).await;
    }
}

/// Best-effort disconnect; skipped when the stack already reports the link down
async fn release(peripheral: &Peripheral) {
    match peripheral.is_connected().await {
        Ok(false) => {}
        _ => {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
    }
}

/// Keeps the adapter scanning until [`ActiveScan::stop`] or drop
///
/// When a scan is cancelled mid-wait the future is dropped, so the stop
/// request is handed to the runtime instead.
struct ActiveScan {
    adapter: Option<Adapter>,
}

impl ActiveScan {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }

    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            stop_scan(&adapter).await;
        }
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            debug!("Scan interrupted, stopping it in the background");
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { stop_scan(&adapter).await });
            }
        }
    }
}

async fn stop_scan(adapter: &Adapter) {
    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan: {}", e);
    }
}
