//! Session state and operation outcomes.
//!
//! Returned by [`UpdateSession`](super::session::UpdateSession) calls and
//! rendered by [`status`](crate::status) for the bus.

use crate::flash::FlashReport;
use crate::manifest::UpdateCandidate;

/// Lifecycle state of the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Checking,
    Downloading,
    Writing,
    Verifying,
    /// Last operation failed; accepts `check`/`apply` like `Idle`.
    Failed,
    Rebooting,
}

impl SessionState {
    /// States that accept a new check or apply.
    pub fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    /// States in which an image is being transferred.
    pub fn is_updating(self) -> bool {
        matches!(self, Self::Downloading | Self::Writing | Self::Verifying)
    }

    /// States in which the download loop can still observe a cancel.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Downloading | Self::Writing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpdateAvailable(UpdateCandidate),
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing to install.
    UpToDate,
    /// An update exists; not installed because `force` was false.
    Available(UpdateCandidate),
    /// The image was installed and the device is restarting into it.
    Rebooting {
        version: String,
        report: FlashReport,
    },
}

/// Consistent copy of the session state, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub running_version: String,
    pub progress_percent: u8,
    pub last_error: Option<String>,
    pub auto_update: bool,
    pub pending: Option<UpdateCandidate>,
    pub last_check_ms: Option<u64>,
    pub last_applied_version: Option<String>,
    pub last_applied_at: Option<String>,
}
