//! OTA pipeline configuration.
//!
//! Defaults mirror the deployed devices: hourly manifest checks, a one
//! minute poll loop, five fetch attempts six seconds apart, 128-byte
//! download chunks and a three second pause before restarting.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;
use crate::version::VersionPolicy;

/// Upper bound on the scheduled check interval (7 days).
pub const MAX_CHECK_INTERVAL_MS: u64 = 7 * 24 * 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    // --- Server ---
    /// Manifest endpoint.
    pub server_url: String,
    /// Sent as the bearer token on manifest requests.
    pub client_id: String,
    /// Build label of the running image, e.g. `Master-1.0.0`.
    pub current_version: String,

    // --- Scheduling ---
    pub check_interval_ms: u64,
    /// How often the agent wakes to consult the schedule.
    pub poll_interval_ms: u64,
    /// Initial auto-update flag when nothing is stored yet.
    pub auto_update_default: bool,

    // --- Transfer ---
    pub retry: RetryPolicy,
    pub chunk_size: usize,
    pub read_timeout_ms: u64,
    /// Upper bound on the manifest body.
    pub manifest_limit: usize,
    pub version_policy: VersionPolicy,

    // --- Restart ---
    pub reboot_delay_ms: u64,

    // --- Agent task ---
    pub stack_kb: usize,
    /// FreeRTOS priority of the agent thread, pinned to the app core.
    pub task_priority: u8,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            client_id: String::new(),
            current_version: String::from("Master"),

            check_interval_ms: 3_600_000, // 1 h
            poll_interval_ms: 60_000,     // 1 min
            auto_update_default: false,

            retry: RetryPolicy::default(),
            chunk_size: 128,
            read_timeout_ms: 5_000,
            manifest_limit: 4_096,
            version_policy: VersionPolicy::default(),

            reboot_delay_ms: 3_000,

            stack_kb: 12,
            task_priority: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl OtaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::ValidationFailed("server_url must be set"));
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ConfigError::ValidationFailed(
                "server_url must be an http(s) URL",
            ));
        }
        if self.current_version.is_empty() {
            return Err(ConfigError::ValidationFailed("current_version must be set"));
        }
        if !(1..=10).contains(&self.retry.max_attempts) {
            return Err(ConfigError::ValidationFailed(
                "retry.max_attempts must be 1–10",
            ));
        }
        if self.retry.delay_ms > 60_000 {
            return Err(ConfigError::ValidationFailed(
                "retry.delay_ms must be at most 60000",
            ));
        }
        if !(16..=4096).contains(&self.chunk_size) {
            return Err(ConfigError::ValidationFailed("chunk_size must be 16–4096"));
        }
        if !(1_000..=60_000).contains(&self.read_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "read_timeout_ms must be 1000–60000",
            ));
        }
        if !(256..=65_536).contains(&self.manifest_limit) {
            return Err(ConfigError::ValidationFailed(
                "manifest_limit must be 256–65536",
            ));
        }
        if !(1_000..=3_600_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be 1000–3600000",
            ));
        }
        if self.check_interval_ms > MAX_CHECK_INTERVAL_MS {
            return Err(ConfigError::ValidationFailed(
                "check_interval_ms must be at most 7 days",
            ));
        }
        if self.check_interval_ms < self.poll_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "check_interval_ms must be >= poll_interval_ms",
            ));
        }
        if !(4..=64).contains(&self.stack_kb) {
            return Err(ConfigError::ValidationFailed("stack_kb must be 4–64"));
        }
        if !(1..=5).contains(&self.task_priority) {
            return Err(ConfigError::ValidationFailed("task_priority must be 1–5"));
        }
        Ok(())
    }
}
