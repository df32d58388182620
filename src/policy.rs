//! Retry and scheduling policy.
//!
//! Pure value types with no I/O, so every decision here is unit-testable
//! on the host.  The session owns one [`UpdatePolicy`]; the manifest client
//! owns one [`RetryPolicy`].

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{OtaError, Result};

// ── Retry ─────────────────────────────────────────────────────

/// Fixed-delay retry for the manifest fetch.  Flash writes are never
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 6_000,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.  `sleep` is called between attempts only,
    /// never after the last one.  Only the final error is returned.
    pub fn run<T>(
        &self,
        mut sleep: impl FnMut(u64),
        mut op: impl FnMut(u32) -> Result<T>,
    ) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "attempt {}/{} failed: {} (retrying in {} ms)",
                        attempt, attempts, e, self.delay_ms
                    );
                    sleep(self.delay_ms);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Periodic check scheduling ─────────────────────────────────

/// What the periodic ticker should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Check,
    /// Check, and install immediately if something is found.
    CheckAndApply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePolicy {
    auto_update: bool,
    check_interval_ms: u64,
    last_check_ms: Option<u64>,
}

impl UpdatePolicy {
    pub fn new(auto_update: bool, check_interval_ms: u64) -> Self {
        Self {
            auto_update,
            check_interval_ms,
            last_check_ms: None,
        }
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        self.auto_update = enabled;
    }

    pub fn check_interval_ms(&self) -> u64 {
        self.check_interval_ms
    }

    pub fn last_check_ms(&self) -> Option<u64> {
        self.last_check_ms
    }

    /// Record that a check started at `now_ms`.
    pub fn mark_checked(&mut self, now_ms: u64) {
        self.last_check_ms = Some(now_ms);
    }

    /// The first tick after boot is always due.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_check_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.check_interval_ms,
        }
    }

    pub fn on_tick(&self, now_ms: u64) -> Option<TickAction> {
        if !self.is_due(now_ms) {
            return None;
        }
        Some(if self.auto_update {
            TickAction::CheckAndApply
        } else {
            TickAction::Check
        })
    }

    /// Milliseconds until the next check is due (0 when already due).
    pub fn next_due_in(&self, now_ms: u64) -> u64 {
        match self.last_check_ms {
            None => 0,
            Some(last) => last
                .saturating_add(self.check_interval_ms)
                .saturating_sub(now_ms),
        }
    }
}

/// Convenience for the session: treat `NoUpdate` as a non-error outcome.
pub(crate) fn is_benign(e: &OtaError) -> bool {
    matches!(e, OtaError::NoUpdate)
}
