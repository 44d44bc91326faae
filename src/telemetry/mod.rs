//! # Telemetry Module
//!
//! Handles IMU telemetry from notification to disk.
//!
//! This module handles:
//! - Decoding JSON notification payloads into samples
//! - Validating every numeric field
//! - Writing samples to an append-only CSV file, one flushed line per sample

pub mod decoder;
pub mod sink;
pub mod types;

pub use decoder::{DecodeError, NotificationDecoder};
pub use sink::LogSink;
pub use types::{Angles, Axes, SampleRecord, Timestamp};
