//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable client id in the form `OTA-XXYYZZ` (last 3 bytes of
//! the 6-byte MAC in uppercase hex).  It is sent as the bearer token on
//! manifest requests and stored as the bus client id.

/// Fixed-size client id string: "OTA-XXYYZZ" (10 chars).
pub type ClientIdString = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn client_id(mac: &MacAddress) -> ClientIdString {
    let mut id = ClientIdString::new();
    use core::fmt::Write;
    let _ = write!(id, "OTA-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}
