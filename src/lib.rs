//! OTA firmware update pipeline for ESP32 master/slave devices.
//!
//! Exposes the pipeline for integration testing and for the firmware
//! binary.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; on the host every
//! port has a simulation adapter.

#![deny(unused_must_use)]

pub mod agent;
pub mod app;
pub mod bridge;
pub mod config;
pub mod error;
pub mod flash;
pub mod manifest;
pub mod policy;
pub mod status;
pub mod version;

pub mod adapters;
pub mod drivers;

mod esp_link_shims;

pub use error::{OtaError, Result};
