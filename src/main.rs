//! OtaFlow firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspWifiLink   EspHttp     EspSlot        NvsSettings          │
//! │  (NetworkPort) (HttpPort)  (FirmwareSlot) (SettingsPort)       │
//! │  Esp32TimeAdapter  LogBus     LogObserver  BusStatusObserver   │
//! │  (SystemPort)      (BusPort)  (observers)                      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │        UpdateSession (state machine, pure logic)       │    │
//! │  │  ManifestClient · FlashWriter · UpdatePolicy · Bridge  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  UpdateAgent (mailbox + ticker, own thread)                    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The WiFi station is started before the agent; while it is down every
//! check fails fast and the agent retries on its next poll.  The broker
//! client belongs to the host firmware that embeds this pipeline.
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use otaflow::adapters::bus_status::{BusStatusObserver, LogBus};
use otaflow::adapters::device_id;
use otaflow::adapters::flash_slot::{self, EspSlot};
use otaflow::adapters::http::EspHttp;
use otaflow::adapters::log_sink::LogObserver;
use otaflow::adapters::nvs::NvsSettings;
use otaflow::adapters::time::Esp32TimeAdapter;
use otaflow::adapters::wifi::{EspWifiLink, WifiCredentials};
use otaflow::agent::UpdateAgent;
use otaflow::app::commands::OtaRequest;
use otaflow::app::ports::{OtaPlatform, Ports};
use otaflow::app::session::UpdateSession;
use otaflow::config::OtaConfig;

// ── Platform binding ──────────────────────────────────────────

struct Esp32;

impl OtaPlatform for Esp32 {
    type Network = EspWifiLink;
    type Http = EspHttp;
    type Slot = EspSlot;
    type Settings = NvsSettings;
    type Bus = LogBus;
    type System = Esp32TimeAdapter;
}

/// Compile-time overrides: `OTA_SERVER_URL`, `OTA_FIRMWARE_LABEL`.
/// WiFi credentials come from `OTA_WIFI_SSID` / `OTA_WIFI_PASS`.
fn load_config(client_id: &str) -> OtaConfig {
    OtaConfig {
        server_url: option_env!("OTA_SERVER_URL").unwrap_or_default().to_owned(),
        current_version: option_env!("OTA_FIRMWARE_LABEL")
            .unwrap_or("Master")
            .to_owned(),
        client_id: client_id.to_owned(),
        ..OtaConfig::default()
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  OtaFlow v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Confirm the running image ──────────────────────────
    // We got this far, so cancel the bootloader's pending rollback.
    flash_slot::confirm_running_image();

    // ── 3. Identity + config ──────────────────────────────────
    let mac = device_id::read_mac();
    let client_id = device_id::client_id(&mac);
    let config = load_config(&client_id);
    config.validate().context("OTA configuration")?;
    info!(
        "Device {} running {} (server {})",
        client_id, config.current_version, config.server_url
    );

    // ── 4. Adapters ───────────────────────────────────────────
    let peripherals = esp_idf_svc::hal::peripherals::Peripherals::take()
        .context("taking peripherals")?;
    let sysloop = esp_idf_svc::eventloop::EspSystemEventLoop::take()
        .context("taking system event loop")?;
    let creds = WifiCredentials::from_build_env().context("WiFi credentials")?;
    let network = EspWifiLink::start(peripherals.modem, sysloop, &creds)
        .context("starting WiFi station")?;

    let settings = NvsSettings::new()
        .map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let bus = LogBus::new();

    let ports: Ports<Esp32> = Ports {
        network,
        http: EspHttp::new(config.read_timeout_ms),
        slot: EspSlot::new(),
        settings,
        bus: bus.clone(),
        system: Esp32TimeAdapter::new(),
    };

    // ── 5. Session + observers ────────────────────────────────
    let session = Arc::new(UpdateSession::new(&config, ports));
    session.attach(Arc::new(LogObserver::new()));
    session.attach(Arc::new(BusStatusObserver::new(bus)));

    // ── 6. Agent ──────────────────────────────────────────────
    let agent = UpdateAgent::new(Arc::clone(&session), config.poll_interval_ms);
    let handle = agent.handle();
    let join = agent
        .spawn(config.stack_kb, config.task_priority)
        .context("spawning OTA agent")?;

    for req in [OtaRequest::SetPolling(true), OtaRequest::PublishStatus] {
        if handle.post(req).is_err() {
            warn!("OTA agent mailbox full at boot");
        }
    }

    join.join()
        .map_err(|_| anyhow::anyhow!("OTA agent thread panicked"))?;
    Ok(())
}
