//! Update session — the OTA state machine.
//!
//! ```text
//!  Idle/Failed ──check()──▶ Checking ──▶ Idle (pending = found / none)
//!       │                      └──error──▶ Failed
//!       └──apply(force)──▶ Downloading ──▶ Writing ──▶ Verifying ──▶ Rebooting
//!                              └────────────┴────────────┴──error──▶ Failed
//! ```
//!
//! One session per process, constructed in `main` and shared behind an
//! `Arc`.  All state lives in [`SessionCore`] behind a single mutex that
//! is only ever touched through [`UpdateSession::with_core`], so no path
//! can leave it locked.  Network and flash I/O run with the lock released;
//! admission is decided atomically, so a second `check`/`apply` while one
//! is in flight gets `Busy` without doing any I/O.  With the station link
//! down both return `Transport("WiFi not connected")` up front, leaving the
//! state and the check schedule untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};

use super::events::{ApplyOutcome, CheckOutcome, SessionSnapshot, SessionState};
use super::ports::{
    BodyReader, BusError, BusPort, FirmwareSlot, HttpPort, NetworkPort, OtaPlatform, Ports,
    SystemPort, UpdateObserver,
};
use crate::bridge::{ConfigBridge, LastApplied};
use crate::config::OtaConfig;
use crate::error::{OtaError, Result};
use crate::flash::{FlashReport, FlashWriter, progress_percent};
use crate::manifest::{ManifestClient, UpdateCandidate};
use crate::policy::{TickAction, UpdatePolicy, is_benign};
use crate::status;

// ───────────────────────────────────────────────────────────────
// Shared state
// ───────────────────────────────────────────────────────────────

struct SessionCore {
    state: SessionState,
    progress: u8,
    last_error: Option<String>,
    policy: UpdatePolicy,
    pending: Option<UpdateCandidate>,
    last_applied: LastApplied,
}

// ───────────────────────────────────────────────────────────────
// UpdateSession
// ───────────────────────────────────────────────────────────────

pub struct UpdateSession<P: OtaPlatform> {
    ports: Ports<P>,
    manifest: ManifestClient,
    chunk_size: usize,
    reboot_delay_ms: u64,
    core: Mutex<SessionCore>,
    observers: Mutex<Vec<Arc<dyn UpdateObserver>>>,
    cancel: AtomicBool,
}

impl<P: OtaPlatform> UpdateSession<P> {
    /// Build the session, restoring the auto-update flag and the
    /// last-applied record from settings.
    pub fn new(config: &OtaConfig, ports: Ports<P>) -> Self {
        let bridge = ConfigBridge::new(&ports.settings, &ports.bus);
        let auto_update = bridge.load_auto_update_flag(config.auto_update_default);
        let last_applied = bridge.load_last_applied();
        let manifest = ManifestClient::new(config);

        info!(
            "OTA: session for {} (role {:?}, auto_update={})",
            manifest.running().label(),
            manifest.running().role(),
            auto_update
        );

        Self {
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                progress: 0,
                last_error: None,
                policy: UpdatePolicy::new(auto_update, config.check_interval_ms),
                pending: None,
                last_applied,
            }),
            ports,
            manifest,
            chunk_size: config.chunk_size.max(1),
            reboot_delay_ms: config.reboot_delay_ms,
            observers: Mutex::new(Vec::new()),
            cancel: AtomicBool::new(false),
        }
    }

    /// Run `f` with exclusive access to the session state.
    fn with_core<R>(&self, f: impl FnOnce(&mut SessionCore) -> R) -> R {
        let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut core)
    }

    fn bridge(&self) -> ConfigBridge<'_, P::Settings, P::Bus> {
        ConfigBridge::new(&self.ports.settings, &self.ports.bus)
    }

    // ── Observers ─────────────────────────────────────────────

    pub fn attach(&self, observer: Arc<dyn UpdateObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Call `f` on every observer with no session lock held.
    fn notify(&self, f: impl Fn(&dyn UpdateObserver)) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for o in &observers {
            f(o.as_ref());
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.ports.network.is_connected() {
            Ok(())
        } else {
            warn!("OTA: skipped, WiFi not connected");
            Err(OtaError::Transport("WiFi not connected".into()))
        }
    }

    fn fail(&self, e: &OtaError) {
        error!("OTA: {}", e);
        let msg = e.to_string();
        self.with_core(|c| {
            c.state = SessionState::Failed;
            c.last_error = Some(msg.clone());
        });
        self.notify(|o| o.on_error(&msg));
    }

    // ── Check ─────────────────────────────────────────────────

    /// Ask the server whether an eligible update exists.
    ///
    /// `Ok(UpToDate)` when nothing applies; `Busy` without I/O when another
    /// operation is in flight.  Transport and parse failures move the
    /// session to `Failed`.
    pub fn check(&self) -> Result<CheckOutcome> {
        self.ensure_online()?;
        let now = self.ports.system.now_ms();
        self.with_core(|c| {
            if !c.state.is_resting() {
                return Err(OtaError::Busy);
            }
            Self::enter_checking(c, now);
            Ok(())
        })?;
        self.run_check()
    }

    fn enter_checking(c: &mut SessionCore, now: u64) {
        c.state = SessionState::Checking;
        c.last_error = None;
        c.policy.mark_checked(now);
    }

    /// Body of a check; the caller has already moved the state to Checking.
    fn run_check(&self) -> Result<CheckOutcome> {
        let bridge = self.bridge();
        let result =
            self.manifest
                .check_for_update(&self.ports.http, &self.ports.system, &bridge);
        match result {
            Ok(candidate) => {
                let found = candidate.clone();
                self.with_core(|c| {
                    c.state = SessionState::Idle;
                    c.pending = Some(found);
                });
                Ok(CheckOutcome::UpdateAvailable(candidate))
            }
            Err(e) if is_benign(&e) => {
                info!("OTA: firmware is up to date");
                self.with_core(|c| {
                    c.state = SessionState::Idle;
                    c.pending = None;
                });
                Ok(CheckOutcome::UpToDate)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    // ── Apply ─────────────────────────────────────────────────

    /// Install the pending update, checking first if none is known.
    ///
    /// With `force = false` an available update is reported as
    /// [`ApplyOutcome::Available`] and nothing is downloaded.  On success
    /// the applied version is persisted, observers see `on_end(true)`, and
    /// the device restarts after the configured delay.
    pub fn apply(&self, force: bool) -> Result<ApplyOutcome> {
        self.ensure_online()?;
        let now = self.ports.system.now_ms();
        let known = self.with_core(|c| {
            if !c.state.is_resting() {
                return Err(OtaError::Busy);
            }
            if c.pending.is_none() {
                Self::enter_checking(c, now);
            }
            Ok(c.pending.clone())
        })?;

        let candidate = match known {
            Some(c) => c,
            None => match self.run_check()? {
                CheckOutcome::UpToDate => return Ok(ApplyOutcome::UpToDate),
                CheckOutcome::UpdateAvailable(c) => c,
            },
        };

        if !force {
            info!("OTA: update {} available (not forced)", candidate.version);
            return Ok(ApplyOutcome::Available(candidate));
        }

        self.with_core(|c| {
            if !c.state.is_resting() {
                return Err(OtaError::Busy);
            }
            // Cleared under the lock so a cancel that observes
            // Downloading is never lost.
            self.cancel.store(false, Ordering::SeqCst);
            c.state = SessionState::Downloading;
            c.progress = 0;
            c.last_error = None;
            Ok(())
        })?;

        match self.install(&candidate) {
            Ok(report) => Ok(self.finish(candidate, report)),
            Err(e) => {
                self.fail(&e);
                self.notify(|o| o.on_end(false));
                Err(e)
            }
        }
    }

    /// Download → Writing → Verifying.  Any error leaves the running image
    /// as the boot target.
    fn install(&self, candidate: &UpdateCandidate) -> Result<FlashReport> {
        info!("OTA: downloading {} from {}", candidate.version, candidate.url);
        let mut resp = self.ports.http.get(&candidate.url, &[])?;
        if !resp.is_success() {
            return Err(OtaError::Transport(format!("HTTP error: {}", resp.status)));
        }
        let size = match resp.content_length {
            Some(n) => u32::try_from(n).map_err(|_| OtaError::InsufficientSpace {
                required: u32::MAX,
                available: self.ports.slot.capacity().unwrap_or(0),
            })?,
            None => return Err(OtaError::Io("Invalid content length".into())),
        };

        let writer = FlashWriter::new(&self.ports.slot);
        let mut handle = writer.begin_write(size)?;
        self.with_core(|c| c.state = SessionState::Writing);
        self.notify(|o| o.on_start(&candidate.version, size));

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            if self.cancel.swap(false, Ordering::SeqCst) {
                writer.abort(handle);
                return Err(OtaError::Aborted);
            }
            let n = match resp.body.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    writer.abort(handle);
                    return Err(OtaError::Io(e.to_string()));
                }
            };
            if n == 0 {
                break;
            }
            let total = writer.write_chunk(&mut handle, &buf[..n])?;
            let pct = progress_percent(total, size);
            let pct = self.with_core(|c| {
                c.progress = c.progress.max(pct);
                c.progress
            });
            self.notify(|o| o.on_progress(pct));
            if total == size {
                break;
            }
        }

        self.with_core(|c| c.state = SessionState::Verifying);
        writer.finalize(handle)
    }

    fn finish(&self, candidate: UpdateCandidate, report: FlashReport) -> ApplyOutcome {
        let timestamp = self.ports.system.timestamp();
        if let Err(e) = self
            .bridge()
            .save_last_applied(&candidate.version, &timestamp)
        {
            warn!("OTA: could not persist applied version: {}", e);
        }

        let version = candidate.version;
        self.with_core(|c| {
            c.state = SessionState::Rebooting;
            c.progress = 100;
            c.pending = None;
            c.last_applied = LastApplied {
                version: Some(version.clone()),
                timestamp: Some(timestamp),
            };
        });
        self.notify(|o| o.on_end(true));

        info!(
            "OTA: {} installed, restarting in {} ms",
            version, self.reboot_delay_ms
        );
        self.ports.system.sleep_ms(self.reboot_delay_ms);
        self.ports.system.restart();
        ApplyOutcome::Rebooting { version, report }
    }

    /// Ask an in-flight download to stop.  Returns whether one was running.
    ///
    /// The stream loop notices between chunks, aborts the slot and ends in
    /// `Failed` with [`OtaError::Aborted`].  Once the image is verifying
    /// the loop has exited, so there is nothing left to cancel.
    pub fn cancel(&self) -> bool {
        let active = self.with_core(|c| c.state.is_streaming());
        if active {
            warn!("OTA: cancel requested");
            self.cancel.store(true, Ordering::SeqCst);
        }
        active
    }

    // ── Policy ────────────────────────────────────────────────

    /// Persist and apply the auto-update flag.  The in-memory flag changes
    /// even if persistence fails.
    pub fn set_auto_update(&self, enabled: bool) -> Result<()> {
        self.with_core(|c| c.policy.set_auto_update(enabled));
        info!("OTA: auto_update={}", enabled);
        self.bridge().save_auto_update_flag(enabled)?;
        Ok(())
    }

    /// What the periodic ticker should do at `now_ms`.  Nothing is due
    /// while an operation is in flight.
    pub fn on_tick(&self, now_ms: u64) -> Option<TickAction> {
        self.with_core(|c| {
            if c.state.is_resting() {
                c.policy.on_tick(now_ms)
            } else {
                None
            }
        })
    }

    /// Milliseconds until the next scheduled check.
    pub fn next_due_in(&self, now_ms: u64) -> u64 {
        self.with_core(|c| c.policy.next_due_in(now_ms))
    }

    pub fn now_ms(&self) -> u64 {
        self.ports.system.now_ms()
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let running_version = self.manifest.running().label().to_owned();
        self.with_core(|c| SessionSnapshot {
            state: c.state,
            running_version,
            progress_percent: c.progress,
            last_error: c.last_error.clone(),
            auto_update: c.policy.auto_update(),
            pending: c.pending.clone(),
            last_check_ms: c.policy.last_check_ms(),
            last_applied_version: c.last_applied.version.clone(),
            last_applied_at: c.last_applied.timestamp.clone(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.with_core(|c| c.state)
    }

    pub fn progress(&self) -> u8 {
        self.with_core(|c| c.progress)
    }

    pub fn last_error(&self) -> Option<String> {
        self.with_core(|c| c.last_error.clone())
    }

    pub fn auto_update(&self) -> bool {
        self.with_core(|c| c.policy.auto_update())
    }

    /// Status line from cached state; never does network I/O.
    pub fn status_line(&self) -> String {
        status::render(&self.snapshot())
    }

    pub fn publish_status(&self) -> core::result::Result<(), BusError> {
        self.ports.bus.publish_status(&self.status_line())
    }
}
