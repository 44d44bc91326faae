//! Trait abstraction for the BLE transport to enable testing

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DeviceDescriptor, LinkEvent};
use crate::error::Result;

/// The radio as seen by an acquisition session
///
/// Implementations deliver notifications through the returned channel, in
/// the order the peripheral sent them. A closed channel means the link is
/// gone, exactly like an explicit [`LinkEvent::Lost`].
#[cfg_attr(test, mockall::automock(type Connection = u32;))]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Handle to one open connection, exclusively owned by the caller
    type Connection: Send;

    /// Run one discovery scan bounded by `timeout`
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>>;

    /// Open a connection to `device`
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Self::Connection>;

    /// Subscribe to notifications on `channel`
    async fn subscribe(
        &self,
        connection: &mut Self::Connection,
        channel: Uuid,
    ) -> Result<mpsc::Receiver<LinkEvent>>;

    /// Release the connection; never fails, safe after partial setup
    async fn close(&self, connection: Self::Connection);
}
