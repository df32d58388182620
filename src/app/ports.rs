//! Port traits — the hexagonal boundary between the OTA pipeline and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ UpdateSession (domain)
//! ```
//!
//! Driven adapters (WiFi link, HTTP client, flash slot, NVS settings,
//! message bus, system clock) implement these traits.  The
//! [`UpdateSession`](super::session::UpdateSession) consumes them through
//! the [`OtaPlatform`] bundle, so the state machine never touches ESP-IDF
//! directly.
//!
//! Every port takes `&self`: the session is shared between the background
//! agent and operator callers, and long-running I/O happens with the
//! session lock released.  Adapters that need mutation use interior
//! mutability.

use core::fmt;

// ───────────────────────────────────────────────────────────────
// Network transport
// ───────────────────────────────────────────────────────────────

/// Station link state.  Consulted before any check or download so an
/// offline device fails fast instead of spending its retry budget.
pub trait NetworkPort: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Response head plus a streaming body.
pub struct HttpResponse<B> {
    pub status: u16,
    /// Value of `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    pub body: B,
}

impl<B> HttpResponse<B> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP GET.
pub trait HttpPort: Send + Sync {
    type Body: BodyReader;

    fn get(&self, url: &str, headers: &[(&str, &str)])
    -> Result<HttpResponse<Self::Body>, HttpError>;
}

/// Streaming response body.
///
/// Each `read` waits at most the adapter's per-read timeout; a stalled
/// peer surfaces as [`HttpError::Timeout`] instead of hanging.
pub trait BodyReader {
    /// Read up to `buf.len()` bytes.  `Ok(0)` means the peer closed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;

    /// Drain the body into a string, failing past `limit` bytes.
    fn read_to_string(&mut self, limit: usize) -> Result<String, HttpError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if out.len() + n > limit {
                return Err(HttpError::TooLarge);
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).map_err(|_| HttpError::NotText)
    }
}

// ───────────────────────────────────────────────────────────────
// Flash slot (inactive firmware partition)
// ───────────────────────────────────────────────────────────────

/// The platform's "next update partition" primitive.
pub trait FirmwareSlot: Send + Sync {
    type Update: SlotUpdate;

    /// Size in bytes of the inactive slot.
    fn capacity(&self) -> Result<u32, SlotError>;

    /// Open the inactive slot for writing.
    fn begin(&self) -> Result<Self::Update, SlotError>;
}

/// An open write session on the inactive slot.  Lives on the thread
/// that opened it.
pub trait SlotUpdate {
    fn write(&mut self, data: &[u8]) -> Result<(), SlotError>;

    /// Run the platform image check and, only if it passes, mark the slot
    /// as the next boot target.  The running image stays the boot target
    /// on any error.
    fn commit(self) -> Result<(), SlotError>;

    /// Discard the partially written slot.
    fn abort(self);
}

// ───────────────────────────────────────────────────────────────
// Persistent settings (NVS)
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value settings store.
///
/// Writes become durable after [`commit`](Self::commit) on the same
/// namespace.  Keys are limited to 15 bytes on ESP-IDF.
pub trait SettingsPort: Send + Sync {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;
    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_i32(&self, namespace: &str, key: &str) -> Result<Option<i32>, StorageError>;
    fn set_i32(&self, namespace: &str, key: &str, value: i32) -> Result<(), StorageError>;

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StorageError>;
    fn set_bool(&self, namespace: &str, key: &str, value: bool) -> Result<(), StorageError>;

    fn commit(&self, namespace: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Message bus
// ───────────────────────────────────────────────────────────────

/// Broker/bus connection parameters announced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BusParams {
    pub host: String,
    pub port: u16,
    pub ws_url: String,
    pub client_id: String,
}

/// Operator-facing status channel.
pub trait BusPort: Send + Sync {
    fn publish_status(&self, line: &str) -> Result<(), BusError>;

    /// New connection parameters are available (already persisted).
    fn apply_connection(&self, params: &BusParams);
}

// ───────────────────────────────────────────────────────────────
// System services
// ───────────────────────────────────────────────────────────────

pub trait SystemPort: Send + Sync {
    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    fn sleep_ms(&self, ms: u64);

    /// Timestamp recorded with an applied update.
    fn timestamp(&self) -> String;

    /// Hard restart into the boot slot.  Does not return on hardware.
    fn restart(&self);
}

// ───────────────────────────────────────────────────────────────
// Observer (driven adapter: domain → log / bus / tests)
// ───────────────────────────────────────────────────────────────

/// Receives session progress.  Invoked without the session lock held,
/// so an observer may call back into the session.
pub trait UpdateObserver: Send + Sync {
    /// The slot accepted the image size and streaming is about to start.
    fn on_start(&self, _version: &str, _total_bytes: u32) {}

    /// Called after every written chunk.
    fn on_progress(&self, _percent: u8) {}

    /// End of a download attempt.
    fn on_end(&self, _success: bool) {}

    fn on_error(&self, _message: &str) {}
}

// ───────────────────────────────────────────────────────────────
// Platform bundle
// ───────────────────────────────────────────────────────────────

/// Groups the concrete adapter types used by one session.
pub trait OtaPlatform: Send + Sync + 'static {
    type Network: NetworkPort;
    type Http: HttpPort;
    type Slot: FirmwareSlot;
    type Settings: SettingsPort;
    type Bus: BusPort;
    type System: SystemPort;
}

/// Owned adapter instances handed to the session at construction.
pub struct Ports<P: OtaPlatform> {
    pub network: P::Network,
    pub http: P::Http,
    pub slot: P::Slot,
    pub settings: P::Settings,
    pub bus: P::Bus,
    pub system: P::System,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Connection could not be established.
    Connect(String),
    /// No bytes arrived within the per-read timeout.
    Timeout,
    /// Body exceeded the caller's limit.
    TooLarge,
    /// Body arrived intact but is not UTF-8 text.
    NotText,
    /// Any other transport failure.
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    NoPartition,
    BeginFailed,
    WriteFailed,
    ImageInvalid,
    BootSetFailed,
}

/// Errors from [`SettingsPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Namespace could not be opened.
    OpenFailed,
    /// Storage partition is full.
    Full,
    /// Stored value has a different type or is malformed.
    TypeMismatch,
    /// Generic I/O error.
    IoError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    NotConnected,
    PublishFailed,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "connect failed: {}", msg),
            Self::Timeout => write!(f, "read timed out"),
            Self::TooLarge => write!(f, "response body too large"),
            Self::NotText => write!(f, "response body is not UTF-8"),
            Self::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::ImageInvalid => write!(f, "image failed platform validation"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "namespace open failed"),
            Self::Full => write!(f, "storage full"),
            Self::TypeMismatch => write!(f, "stored value type mismatch"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "bus not connected"),
            Self::PublishFailed => write!(f, "publish failed"),
        }
    }
}
