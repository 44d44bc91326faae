//! # Reconnect Backoff
//!
//! Delay policy applied between a lost connection and the next attempt.
//! Retries are never bounded; the policy only decides how long to wait.

use std::time::Duration;

use crate::config::{BackoffKind, SessionConfig};

/// Delay before reconnect attempt number `attempt` (1-based)
pub trait BackoffPolicy: Send {
    fn delay(&mut self, attempt: u32) -> Duration;

    /// Called once a connection reaches streaming
    fn reset(&mut self) {}
}

/// Same delay every time (default: 3 s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    interval: Duration,
}

impl ConstantBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for ConstantBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl BackoffPolicy for ConstantBackoff {
    fn delay(&mut self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// Doubling delay starting at `base`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&mut self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Policy selected by the `[session]` configuration section
pub fn from_config(config: &SessionConfig) -> Box<dyn BackoffPolicy> {
    let interval = Duration::from_millis(config.reconnect_interval_ms);
    match config.backoff {
        BackoffKind::Constant => Box::new(ConstantBackoff::new(interval)),
        BackoffKind::Exponential => Box::new(ExponentialBackoff::new(
            interval,
            Duration::from_millis(config.max_backoff_ms),
        )),
    }
}
