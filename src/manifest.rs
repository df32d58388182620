//! Version manifest: fetch, parse, and candidate selection.
//!
//! ```text
//!   GET server_url ──▶ JSON ──▶ FirmwareManifest ──▶ role entry ──▶ policy ──▶ UpdateCandidate
//!        (retried)                    │
//!                                     └──▶ broker params ──▶ ConfigBridge
//! ```
//!
//! The server answers every device with the same document; each device
//! picks the `master_*` or `slave_*` pair according to its own role.

use log::{debug, info, warn};
use serde::Deserialize;

use crate::app::ports::{
    BodyReader, BusParams, BusPort, HttpError, HttpPort, SettingsPort, SystemPort,
};
use crate::bridge::ConfigBridge;
use crate::config::OtaConfig;
use crate::error::{OtaError, Result};
use crate::policy::RetryPolicy;
use crate::version::{DeviceRole, RunningVersion, VersionPolicy};

// ── Wire format ───────────────────────────────────────────────

/// Server manifest.  Absent fields decode as empty/zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FirmwareManifest {
    pub success: bool,
    pub broker_server: String,
    pub broker_port: u16,
    pub ws_url: String,
    pub master_version: String,
    pub master_link: String,
    pub slave_version: String,
    pub slave_link: String,
}

impl FirmwareManifest {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| OtaError::Parse(e.to_string()))
    }

    /// `(version, url)` advertised for `role`.
    pub fn entry_for(&self, role: DeviceRole) -> (&str, &str) {
        match role {
            DeviceRole::Master => (&self.master_version, &self.master_link),
            DeviceRole::Slave => (&self.slave_version, &self.slave_link),
        }
    }

    pub fn bus_params(&self, client_id: &str) -> BusParams {
        BusParams {
            host: self.broker_server.clone(),
            port: self.broker_port,
            ws_url: self.ws_url.clone(),
            client_id: client_id.to_owned(),
        }
    }
}

/// An eligible image for this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    pub version: String,
    pub url: String,
}

/// Pick this device's entry and apply the eligibility rule.
pub fn select_candidate(
    manifest: &FirmwareManifest,
    running: &RunningVersion,
    policy: VersionPolicy,
) -> Result<UpdateCandidate> {
    if !manifest.success {
        return Err(OtaError::NoUpdate);
    }
    let (version, url) = manifest.entry_for(running.role());
    if version.is_empty() || url.is_empty() {
        return Err(OtaError::NoUpdate);
    }
    if !policy.is_eligible(version, running) {
        debug!(
            "Manifest: {} not eligible against {} ({:?})",
            version,
            running.label(),
            policy
        );
        return Err(OtaError::NoUpdate);
    }
    Ok(UpdateCandidate {
        version: version.to_owned(),
        url: url.to_owned(),
    })
}

// ── Client ────────────────────────────────────────────────────

pub struct ManifestClient {
    server_url: String,
    client_id: String,
    running: RunningVersion,
    retry: RetryPolicy,
    policy: VersionPolicy,
    body_limit: usize,
}

impl ManifestClient {
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            client_id: config.client_id.clone(),
            running: RunningVersion::new(&config.current_version),
            retry: config.retry,
            policy: config.version_policy,
            body_limit: config.manifest_limit,
        }
    }

    pub fn running(&self) -> &RunningVersion {
        &self.running
    }

    /// Fetch the manifest (with retry) and resolve this device's candidate.
    ///
    /// Errors: `Transport` after the last failed attempt, `Parse` for an
    /// undecodable body, `NoUpdate` when nothing is eligible.
    pub fn check_for_update<H, Y, S, B>(
        &self,
        http: &H,
        system: &Y,
        bridge: &ConfigBridge<'_, S, B>,
    ) -> Result<UpdateCandidate>
    where
        H: HttpPort,
        Y: SystemPort,
        S: SettingsPort,
        B: BusPort,
    {
        info!(
            "Manifest: checking {} (running {}, role {:?})",
            self.server_url,
            self.running.label(),
            self.running.role()
        );

        let body = self
            .retry
            .run(|ms| system.sleep_ms(ms), |_| self.fetch_once(http))?;
        let manifest = FirmwareManifest::parse(&body)?;

        if manifest.success {
            let params = manifest.bus_params(&self.client_id);
            if let Err(e) = bridge.forward_bus_connection_params(&params) {
                warn!("Manifest: could not persist bus params: {}", e);
            }
        }

        let candidate = select_candidate(&manifest, &self.running, self.policy)?;
        info!("Manifest: update available {}", candidate.version);
        Ok(candidate)
    }

    fn fetch_once<H: HttpPort>(&self, http: &H) -> Result<String> {
        let auth = format!("Bearer {}", self.client_id);
        let headers = [
            ("Authorization", auth.as_str()),
            ("Content-Type", "application/json"),
        ];
        let mut resp = http.get(&self.server_url, &headers)?;
        if !resp.is_success() {
            return Err(OtaError::Transport(format!("HTTP error: {}", resp.status)));
        }
        // The body arrived; an oversized or binary one is a bad manifest,
        // not a transport failure worth retrying.
        resp.body
            .read_to_string(self.body_limit)
            .map_err(|e| match e {
                HttpError::TooLarge | HttpError::NotText => OtaError::Parse(e.to_string()),
                other => other.into(),
            })
    }
}
