//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements      | Connects to                       |
//! |---------------|-----------------|-----------------------------------|
//! | `wifi`        | NetworkPort     | ESP-IDF WiFi station / sim switch |
//! | `http`        | HttpPort        | ESP-IDF HTTP client (espidf only) |
//! | `flash_slot`  | FirmwareSlot    | esp-ota / in-memory slot          |
//! | `nvs`         | SettingsPort    | NVS / in-memory store             |
//! | `bus_status`  | BusPort         | Serial log (until a broker client)|
//! |               | UpdateObserver  | Throttled `OTA:UPDATING` lines    |
//! | `log_sink`    | UpdateObserver  | Serial log output                 |
//! | `time`        | SystemPort      | ESP32 system timer, restart       |
//! | `device_id`   | —               | eFuse MAC → client id             |

pub mod bus_status;
pub mod device_id;
pub mod flash_slot;
#[cfg(target_os = "espidf")]
pub mod http;
pub mod log_sink;
pub mod nvs;
pub mod time;
pub mod wifi;
