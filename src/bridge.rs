//! Settings bridge.
//!
//! Thin pass-through between the OTA pipeline and the persistent settings
//! store (plus the bus client for connection parameters).  Holds no state
//! and makes no decisions; it only knows the namespaces and key names.

use log::{debug, warn};

use crate::app::ports::{BusParams, BusPort, SettingsPort, StorageError};

pub const OTA_NAMESPACE: &str = "ota";
pub const KEY_AUTO_UPDATE: &str = "auto_update";
pub const KEY_LAST_VERSION: &str = "last_version";
pub const KEY_LAST_UPDATE: &str = "last_update";

pub const BUS_NAMESPACE: &str = "mqtt";
pub const KEY_BROKER: &str = "broker";
pub const KEY_PORT: &str = "port";
pub const KEY_CLIENT_ID: &str = "clientId";
pub const KEY_URL: &str = "url";

/// The most recently installed image, as recorded just before restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastApplied {
    pub version: Option<String>,
    pub timestamp: Option<String>,
}

pub struct ConfigBridge<'a, S, B> {
    settings: &'a S,
    bus: &'a B,
}

impl<'a, S: SettingsPort, B: BusPort> ConfigBridge<'a, S, B> {
    pub fn new(settings: &'a S, bus: &'a B) -> Self {
        Self { settings, bus }
    }

    /// Stored auto-update flag, or `default` when absent or unreadable.
    pub fn load_auto_update_flag(&self, default: bool) -> bool {
        match self.settings.get_bool(OTA_NAMESPACE, KEY_AUTO_UPDATE) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(e) => {
                warn!("Settings: auto_update read failed ({}), using {}", e, default);
                default
            }
        }
    }

    pub fn save_auto_update_flag(&self, enabled: bool) -> Result<(), StorageError> {
        self.settings
            .set_bool(OTA_NAMESPACE, KEY_AUTO_UPDATE, enabled)?;
        self.settings.commit(OTA_NAMESPACE)
    }

    pub fn load_last_applied(&self) -> LastApplied {
        let read = |key| match self.settings.get_str(OTA_NAMESPACE, key) {
            Ok(v) => v,
            Err(e) => {
                warn!("Settings: {} read failed ({})", key, e);
                None
            }
        };
        LastApplied {
            version: read(KEY_LAST_VERSION),
            timestamp: read(KEY_LAST_UPDATE),
        }
    }

    pub fn save_last_applied(&self, version: &str, timestamp: &str) -> Result<(), StorageError> {
        self.settings
            .set_str(OTA_NAMESPACE, KEY_LAST_VERSION, version)?;
        self.settings
            .set_str(OTA_NAMESPACE, KEY_LAST_UPDATE, timestamp)?;
        self.settings.commit(OTA_NAMESPACE)
    }

    /// Persist the broker parameters, then hand them to the bus client.
    /// The bus gets them even when the store fails; the store error is
    /// still returned.
    pub fn forward_bus_connection_params(&self, params: &BusParams) -> Result<(), StorageError> {
        debug!(
            "Settings: bus params {}:{} ws={} id={}",
            params.host, params.port, params.ws_url, params.client_id
        );
        let stored = self.store_bus_params(params);
        self.bus.apply_connection(params);
        stored
    }

    fn store_bus_params(&self, params: &BusParams) -> Result<(), StorageError> {
        self.settings
            .set_str(BUS_NAMESPACE, KEY_BROKER, &params.host)?;
        self.settings
            .set_i32(BUS_NAMESPACE, KEY_PORT, i32::from(params.port))?;
        self.settings
            .set_str(BUS_NAMESPACE, KEY_CLIENT_ID, &params.client_id)?;
        self.settings.set_str(BUS_NAMESPACE, KEY_URL, &params.ws_url)?;
        self.settings.commit(BUS_NAMESPACE)
    }
}
