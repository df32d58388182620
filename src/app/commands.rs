//! Inbound requests to the update agent.
//!
//! These are posted to the [`UpdateAgent`](crate::agent::UpdateAgent)
//! mailbox by whatever front end the device has (bus command handler,
//! serial console, boot sequence).  Cancellation is not a request: it
//! goes straight to [`UpdateSession::cancel`](super::session::UpdateSession::cancel)
//! because the agent is busy streaming whenever a cancel matters.

/// Requests the agent serialises onto the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaRequest {
    /// Query the manifest now.
    Check,

    /// Install the pending (or freshly found) update.  With
    /// `force = false` an available update is only reported.
    Apply { force: bool },

    /// Persist and apply the auto-update flag.
    SetAutoUpdate(bool),

    /// Enable or disable the periodic check.
    SetPolling(bool),

    /// Publish the current status line to the bus.
    PublishStatus,

    /// Stop the agent loop.
    Shutdown,
}
