//! Update agent — the single task that drives the session.
//!
//! ```text
//!  bus / console / boot ──OtaRequest──▶ ┌──────────────┐
//!                          (mailbox)    │ UpdateAgent  │──▶ UpdateSession
//!  async-io-mini Timer ───── tick ────▶ │ (1 thread)   │──▶ status line → bus
//!                                       └──────────────┘
//! ```
//!
//! Runs on its own thread with an `edge-executor` local executor.  Each
//! loop iteration races the mailbox against a timer; whichever fires
//! first is handled to completion before the next iteration, so scheduled
//! and requested work never overlap.  A direct `apply()` from another
//! thread while the agent is checking gets `Busy` from the session.

use core::ops::ControlFlow;
use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::commands::OtaRequest;
use crate::app::events::{ApplyOutcome, CheckOutcome};
use crate::app::ports::OtaPlatform;
use crate::app::session::UpdateSession;
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::OtaError;
use crate::policy::TickAction;

/// Mailbox depth.  Requests beyond this are refused at `post`.
pub const MAILBOX_DEPTH: usize = 8;

/// Floor for the ticker sleep, so a due-but-refused tick cannot spin.
const MIN_WAIT_MS: u64 = 1_000;

pub type Mailbox = Channel<CriticalSectionRawMutex, OtaRequest, MAILBOX_DEPTH>;

// ── Handle ────────────────────────────────────────────────────

/// Cheap, cloneable front end for other tasks.
pub struct AgentHandle<P: OtaPlatform> {
    session: Arc<UpdateSession<P>>,
    mailbox: Arc<Mailbox>,
}

impl<P: OtaPlatform> Clone for AgentHandle<P> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<P: OtaPlatform> AgentHandle<P> {
    /// Queue a request.  Returns it back when the mailbox is full.
    pub fn post(&self, req: OtaRequest) -> Result<(), OtaRequest> {
        self.mailbox.try_send(req).map_err(|_| {
            warn!("Agent: mailbox full, dropping {:?}", req);
            req
        })
    }

    /// Abort an in-flight download immediately.
    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    pub fn session(&self) -> &Arc<UpdateSession<P>> {
        &self.session
    }
}

// ── Agent ─────────────────────────────────────────────────────

pub struct UpdateAgent<P: OtaPlatform> {
    session: Arc<UpdateSession<P>>,
    mailbox: Arc<Mailbox>,
    polling: bool,
    poll_interval_ms: u64,
}

impl<P: OtaPlatform> UpdateAgent<P> {
    /// Polling starts disabled; enable it with `SetPolling(true)`.
    pub fn new(session: Arc<UpdateSession<P>>, poll_interval_ms: u64) -> Self {
        Self {
            session,
            mailbox: Arc::new(Mailbox::new()),
            polling: false,
            poll_interval_ms,
        }
    }

    pub fn handle(&self) -> AgentHandle<P> {
        AgentHandle {
            session: Arc::clone(&self.session),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Handle one request to completion, then publish the status line.
    pub fn dispatch(&mut self, req: OtaRequest) -> ControlFlow<()> {
        info!("Agent: {:?}", req);
        match req {
            OtaRequest::Check => {
                log_result("check", self.session.check().map(|_| ()));
            }
            OtaRequest::Apply { force } => match self.session.apply(force) {
                Ok(ApplyOutcome::UpToDate) => info!("Agent: nothing to apply"),
                Ok(ApplyOutcome::Available(c)) => {
                    info!("Agent: {} available, awaiting forced apply", c.version)
                }
                Ok(ApplyOutcome::Rebooting { version, .. }) => {
                    info!("Agent: {} applied", version)
                }
                Err(e) => log_result("apply", Err(e)),
            },
            OtaRequest::SetAutoUpdate(enabled) => {
                log_result("set_auto_update", self.session.set_auto_update(enabled));
            }
            OtaRequest::SetPolling(enabled) => {
                self.polling = enabled;
                info!("Agent: polling {}", if enabled { "on" } else { "off" });
            }
            OtaRequest::PublishStatus => {}
            OtaRequest::Shutdown => {
                info!("Agent: shutting down");
                return ControlFlow::Break(());
            }
        }
        self.publish_status();
        ControlFlow::Continue(())
    }

    /// Run whatever the schedule says is due.  Returns the action taken.
    pub fn tick(&mut self) -> Option<TickAction> {
        if !self.polling {
            return None;
        }
        let now = self.session.now_ms();
        let action = self.session.on_tick(now)?;
        match self.session.check() {
            Ok(CheckOutcome::UpdateAvailable(c)) if action == TickAction::CheckAndApply => {
                info!("Agent: auto-applying {}", c.version);
                if let Err(e) = self.session.apply(true) {
                    log_result("auto apply", Err(e));
                }
            }
            Ok(_) => {}
            Err(e) => log_result("scheduled check", Err(e)),
        }
        self.publish_status();
        Some(action)
    }

    fn publish_status(&self) {
        if let Err(e) = self.session.publish_status() {
            warn!("Agent: status publish failed: {}", e);
        }
    }

    fn next_wait_ms(&self) -> u64 {
        if !self.polling {
            return self.poll_interval_ms;
        }
        let due_in = self.session.next_due_in(self.session.now_ms());
        due_in.min(self.poll_interval_ms).max(MIN_WAIT_MS)
    }

    /// Agent loop: mailbox versus ticker until `Shutdown`.
    pub async fn run(mut self) {
        let mailbox = Arc::clone(&self.mailbox);
        loop {
            let wait = Duration::from_millis(self.next_wait_ms());
            let next = futures_lite::future::or(async { Some(mailbox.receive().await) }, async {
                async_io_mini::Timer::after(wait).await;
                None
            })
            .await;

            match next {
                Some(req) => {
                    if self.dispatch(req).is_break() {
                        break;
                    }
                }
                None => {
                    self.tick();
                }
            }
        }
    }

    /// Drive [`run`](Self::run) on a local executor in the current thread.
    pub fn run_blocking(self) {
        let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
        futures_lite::future::block_on(executor.run(self.run()));
    }

    /// Start the agent as a low-priority thread on the app core, away
    /// from the protocol stacks on core 0.
    pub fn spawn(self, stack_kb: usize, priority: u8) -> io::Result<JoinHandle<()>> {
        spawn_on_core(Core::App, priority, stack_kb, "ota-agent\0", move || {
            self.run_blocking()
        })
    }
}

fn log_result(what: &str, result: Result<(), OtaError>) {
    match result {
        Ok(()) => {}
        Err(OtaError::Busy) => warn!("Agent: {} skipped, session busy", what),
        Err(e) => warn!("Agent: {} failed: {}", what, e),
    }
}
