//! Bus status adapters.
//!
//! [`LogBus`] is the [`BusPort`] used until a broker client is wired in:
//! it logs each status line and keeps the last one (and the last broker
//! parameters) for inspection.  [`BusStatusObserver`] turns download
//! progress into `OTA:UPDATING@<pct>` lines, throttled by a token bucket
//! so a 128-byte chunk loop cannot flood the bus.

use core::time::Duration;
use std::sync::{Arc, Mutex};

use burster::Limiter;
use log::{info, warn};

use super::time::platform_now;
use crate::app::ports::{BusError, BusParams, BusPort, UpdateObserver};
use crate::status;

// ── LogBus ────────────────────────────────────────────────────

#[derive(Default)]
struct LogBusState {
    lines: Vec<String>,
    params: Option<BusParams>,
}

/// Logging bus.  Clones share state.
#[derive(Clone, Default)]
pub struct LogBus {
    state: Arc<Mutex<LogBusState>>,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_line(&self) -> Option<String> {
        self.state.lock().ok()?.lines.last().cloned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.lines.clone())
            .unwrap_or_default()
    }

    pub fn last_params(&self) -> Option<BusParams> {
        self.state.lock().ok()?.params.clone()
    }
}

impl BusPort for LogBus {
    fn publish_status(&self, line: &str) -> Result<(), BusError> {
        info!("BUS | {}", line);
        let mut s = self.state.lock().map_err(|_| BusError::PublishFailed)?;
        s.lines.push(line.to_owned());
        Ok(())
    }

    fn apply_connection(&self, params: &BusParams) {
        info!(
            "BUS | connection params {}:{} ({})",
            params.host, params.port, params.ws_url
        );
        if let Ok(mut s) = self.state.lock() {
            s.params = Some(params.clone());
        }
    }
}

// ── Progress observer ─────────────────────────────────────────

pub struct BusStatusObserver<B> {
    bus: B,
    limiter: Mutex<burster::TokenBucket<fn() -> Duration>>,
}

impl<B: BusPort> BusStatusObserver<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            limiter: Mutex::new(burster::TokenBucket::new_with_time_provider(
                2,
                2, // 2 progress lines per second, burst of 2
                platform_now as fn() -> Duration,
            )),
        }
    }

    fn publish(&self, percent: u8) {
        let line = status::updating_line(percent);
        if let Err(e) = self.bus.publish_status(&line) {
            warn!("BUS | publish failed: {}", e);
        }
    }

    fn admit(&self) -> bool {
        match self.limiter.lock() {
            Ok(mut l) => l.try_consume(1).is_ok(),
            Err(_) => false,
        }
    }
}

impl<B: BusPort> UpdateObserver for BusStatusObserver<B> {
    fn on_start(&self, _version: &str, _total_bytes: u32) {
        self.publish(0);
    }

    fn on_progress(&self, percent: u8) {
        // Completion always goes out; intermediate steps are throttled.
        if percent >= 100 || self.admit() {
            self.publish(percent);
        }
    }
}
