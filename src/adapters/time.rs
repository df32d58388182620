//! ESP32 system adapter: clock, sleep, timestamp, restart.
//!
//! - **`target_os = "espidf"`**: `esp_timer_get_time()` for the monotonic
//!   clock, FreeRTOS delay for sleeping and `esp_ota::restart()`.
//! - **host**: `std::time::Instant`, `std::thread::sleep`, and a restart
//!   counter instead of a reset.

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use crate::app::ports::SystemPort;
use log::info;

/// Monotonic time since boot.  Shared with the `burster` token bucket,
/// which takes a plain `fn() -> Duration`.
#[cfg(target_os = "espidf")]
pub fn platform_now() -> Duration {
    Duration::from_micros(unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64)
}

#[cfg(not(target_os = "espidf"))]
pub fn platform_now() -> Duration {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

pub struct Esp32TimeAdapter {
    restarts: AtomicU32,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            restarts: AtomicU32::new(0),
        }
    }

    /// Seconds since boot (monotonic).
    pub fn uptime_secs(&self) -> u64 {
        platform_now().as_secs()
    }

    /// Number of restarts requested (always 0 on hardware, where the first
    /// one does not return).
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl SystemPort for Esp32TimeAdapter {
    fn now_ms(&self) -> u64 {
        platform_now().as_millis() as u64
    }

    #[cfg(target_os = "espidf")]
    fn sleep_ms(&self, ms: u64) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms.min(u64::from(u32::MAX)) as u32);
    }

    #[cfg(not(target_os = "espidf"))]
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    /// Seconds since boot, as the devices have no RTC before NTP sync.
    fn timestamp(&self) -> String {
        self.uptime_secs().to_string()
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        info!("System: restarting");
        #[cfg(target_os = "espidf")]
        esp_ota::restart();
    }
}
