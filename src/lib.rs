//! # IMU Logger Library
//!
//! Log accelerometer, gyroscope and roll/pitch telemetry from a BLE peripheral
//! to CSV.
//!
//! This library provides the acquisition core: locating the peripheral,
//! keeping a notification subscription alive across radio dropouts, decoding
//! each JSON notification and appending it to a single durable CSV file per run.

pub mod ble;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod telemetry;
