//! Log-based observer adapter.
//!
//! Implements [`UpdateObserver`] by writing session progress to the
//! ESP-IDF logger (UART / USB-CDC in production).  Progress is logged
//! once per 10% step so a chunked download does not flood the console.

use core::sync::atomic::{AtomicU8, Ordering};

use log::{error, info, warn};

use crate::app::ports::UpdateObserver;

/// Adapter that logs every session event to the serial console.
pub struct LogObserver {
    last_decile: AtomicU8,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LogObserver {
    pub fn new() -> Self {
        Self {
            last_decile: AtomicU8::new(0),
        }
    }

    /// Returns true when `percent` enters a new 10% step.
    fn crosses_step(&self, percent: u8) -> bool {
        let decile = percent / 10;
        self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile
    }
}

impl UpdateObserver for LogObserver {
    fn on_start(&self, version: &str, total_bytes: u32) {
        self.last_decile.store(0, Ordering::Relaxed);
        info!("OTA | start {} ({} bytes)", version, total_bytes);
    }

    fn on_progress(&self, percent: u8) {
        if self.crosses_step(percent) {
            info!("OTA | progress {}%", percent);
        }
    }

    fn on_end(&self, success: bool) {
        if success {
            info!("OTA | finished");
        } else {
            warn!("OTA | attempt failed");
        }
    }

    fn on_error(&self, message: &str) {
        error!("OTA | error: {}", message);
    }
}
