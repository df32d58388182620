//! Unified error type for the OTA pipeline.
//!
//! Every component (manifest fetch, flash writer, session) funnels its
//! failures into [`OtaError`], so the session can record a single
//! human-readable `last_error` and hand the same value to observers.
//! Port-level errors stay typed at the adapter boundary and are mapped
//! here with `From` impls.

use core::fmt;

use crate::app::ports::{HttpError, SlotError, StorageError};

// ---------------------------------------------------------------------------
// Top-level pipeline error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Network unreachable, timed out, or the server answered non-2xx.
    /// The only kind that is retried (manifest fetch only).
    Transport(String),
    /// The manifest body could not be decoded.
    Parse(String),
    /// Valid manifest, nothing eligible for this device.
    NoUpdate,
    /// The inactive slot cannot hold the advertised image.
    InsufficientSpace { required: u32, available: u32 },
    /// Short, long, or failed chunk transfer.
    Io(String),
    /// The platform rejected the written image.
    Verification(String),
    /// Another check/apply is already in flight.
    Busy,
    /// The update was cancelled mid-stream.
    Aborted,
}

impl OtaError {
    /// Whether the manifest fetch loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Parse(msg) => write!(f, "manifest parse error: {msg}"),
            Self::NoUpdate => write!(f, "no update available"),
            Self::InsufficientSpace {
                required,
                available,
            } => write!(
                f,
                "not enough space for OTA ({required} bytes required, {available} available)"
            ),
            Self::Io(msg) => write!(f, "I/O: {msg}"),
            Self::Verification(msg) => write!(f, "image verification failed: {msg}"),
            Self::Busy => write!(f, "OTA operation already in progress"),
            Self::Aborted => write!(f, "OTA update aborted"),
        }
    }
}

impl std::error::Error for OtaError {}

// ---------------------------------------------------------------------------
// Port error conversions
// ---------------------------------------------------------------------------

impl From<HttpError> for OtaError {
    fn from(e: HttpError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<SlotError> for OtaError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::ImageInvalid | SlotError::BootSetFailed => {
                Self::Verification(e.to_string())
            }
            SlotError::NoPartition | SlotError::BeginFailed | SlotError::WriteFailed => {
                Self::Io(e.to_string())
            }
        }
    }
}

impl From<StorageError> for OtaError {
    fn from(e: StorageError) -> Self {
        Self::Io(e.to_string())
    }
}

/// Pipeline-wide `Result` alias.
pub type Result<T> = core::result::Result<T, OtaError>;
