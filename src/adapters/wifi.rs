//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`] so the session can refuse a check or a
//! download while the station is offline.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`EspWifiLink`] drives `esp_idf_svc::wifi`
//!   in blocking mode.
//! - **all other targets**: [`SimLink`], a shared on/off switch for
//!   host-side tests.
//!
//! ## Reconnection policy
//!
//! A dropped link is retried from `is_connected` after an exponential
//! backoff (2 s → 4 s → 8 s … capped at 60 s).

use core::fmt;

use crate::app::ports::NetworkPort;

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed(String),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(
                f,
                "password invalid (must be 8-64 bytes for WPA2, or empty for open)"
            ),
            Self::ConnectionFailed(e) => write!(f, "WiFi connection failed: {}", e),
        }
    }
}

impl std::error::Error for WifiError {}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Validated station credentials.  An empty password means an open network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, WifiError> {
        if ssid.is_empty() || !is_printable_ascii(ssid) {
            return Err(WifiError::InvalidSsid);
        }
        if !password.is_empty() && password.len() < 8 {
            return Err(WifiError::InvalidPassword);
        }
        Ok(Self {
            ssid: ssid.try_into().map_err(|_| WifiError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
        })
    }

    /// Build-time credentials: `OTA_WIFI_SSID` / `OTA_WIFI_PASS`.
    pub fn from_build_env() -> Result<Self, WifiError> {
        let ssid = option_env!("OTA_WIFI_SSID").ok_or(WifiError::NoCredentials)?;
        Self::new(ssid, option_env!("OTA_WIFI_PASS").unwrap_or_default())
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Reconnect backoff
// ───────────────────────────────────────────────────────────────

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

/// When the next reconnect attempt is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    secs: u64,
    next_at_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            secs: INITIAL_BACKOFF_SECS,
            next_at_ms: 0,
        }
    }
}

impl Backoff {
    pub fn ready(&self, now_ms: u64) -> bool {
        now_ms >= self.next_at_ms
    }

    /// Record a failed attempt at `now_ms` and double the wait.
    pub fn failed(&mut self, now_ms: u64) {
        self.next_at_ms = now_ms.saturating_add(self.secs * 1000);
        self.secs = (self.secs * 2).min(MAX_BACKOFF_SECS);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn current_secs(&self) -> u64 {
        self.secs
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF station
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspWifiLink;

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::{Mutex, PoisonError};

    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::{info, warn};

    use super::{Backoff, WifiCredentials, WifiError};
    use crate::adapters::time::platform_now;
    use crate::app::ports::NetworkPort;

    struct Link {
        wifi: BlockingWifi<EspWifi<'static>>,
        backoff: Backoff,
    }

    pub struct EspWifiLink {
        link: Mutex<Link>,
    }

    fn esp_err(e: esp_idf_svc::sys::EspError) -> WifiError {
        WifiError::ConnectionFailed(e.to_string())
    }

    impl EspWifiLink {
        /// Bring the station up and wait for an IP.  A failed first
        /// connect still returns the link; `is_connected` keeps retrying.
        pub fn start(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            creds: &WifiCredentials,
        ) -> Result<Self, WifiError> {
            let esp = EspWifi::new(modem, sysloop.clone(), None).map_err(esp_err)?;
            let mut wifi = BlockingWifi::wrap(esp, sysloop).map_err(esp_err)?;
            wifi.set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: creds.ssid.clone(),
                password: creds.password.clone(),
                auth_method: if creds.is_open() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            }))
            .map_err(esp_err)?;
            wifi.start().map_err(esp_err)?;

            info!("WiFi: connecting to '{}'", creds.ssid());
            let mut link = Link {
                wifi,
                backoff: Backoff::default(),
            };
            if let Err(e) = link.connect() {
                warn!("WiFi: {}", e);
                link.backoff.failed(platform_now().as_millis() as u64);
            }
            Ok(Self {
                link: Mutex::new(link),
            })
        }
    }

    impl Link {
        fn connect(&mut self) -> Result<(), WifiError> {
            self.wifi.connect().map_err(esp_err)?;
            self.wifi.wait_netif_up().map_err(esp_err)?;
            info!("WiFi: connected");
            Ok(())
        }
    }

    impl NetworkPort for EspWifiLink {
        fn is_connected(&self) -> bool {
            let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            if link.wifi.is_connected().unwrap_or(false) {
                link.backoff.reset();
                return true;
            }
            let now = platform_now().as_millis() as u64;
            if !link.backoff.ready(now) {
                return false;
            }
            match link.connect() {
                Ok(()) => {
                    link.backoff.reset();
                    true
                }
                Err(e) => {
                    link.backoff.failed(now);
                    warn!(
                        "WiFi: {} (retry in {} s)",
                        e,
                        link.backoff.current_secs()
                    );
                    false
                }
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// Shared link switch; clones observe the same state.
#[cfg(not(target_os = "espidf"))]
#[derive(Clone)]
pub struct SimLink {
    up: std::sync::Arc<core::sync::atomic::AtomicBool>,
}

#[cfg(not(target_os = "espidf"))]
impl SimLink {
    pub fn new(connected: bool) -> Self {
        Self {
            up: std::sync::Arc::new(core::sync::atomic::AtomicBool::new(connected)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        log::info!("WiFi(sim): {}", if connected { "up" } else { "down" });
        self.up
            .store(connected, core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(not(target_os = "espidf"))]
impl NetworkPort for SimLink {
    fn is_connected(&self) -> bool {
        self.up.load(core::sync::atomic::Ordering::SeqCst)
    }
}
