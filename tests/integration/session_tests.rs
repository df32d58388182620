//! Integration tests for the check → download → flash → reboot pipeline.
//!
//! Every test drives a real `UpdateSession` over scripted HTTP, the
//! in-memory slot and the host NVS store.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use otaflow::OtaError;
use otaflow::app::events::{ApplyOutcome, CheckOutcome, SessionState};
use otaflow::app::ports::{HttpError, SettingsPort, UpdateObserver};
use otaflow::app::session::UpdateSession;
use otaflow::bridge::{BUS_NAMESPACE, KEY_BROKER, KEY_LAST_VERSION, OTA_NAMESPACE};

use super::mock_platform::*;

// ── Scenario A/B: manifest eligibility ───────────────────────

#[test]
fn master_device_sees_newer_master_image() {
    let rig = Rig::new();
    rig.serve_update(1000);
    let session = rig.session();

    let outcome = session.check().unwrap();
    match outcome {
        CheckOutcome::UpdateAvailable(c) => {
            assert_eq!(c.version, "2.0.0");
            assert_eq!(c.url, FIRMWARE_URL);
        }
        other => panic!("expected an update, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.snapshot().pending.is_some());
}

#[test]
fn equal_version_is_up_to_date() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("1.0.0", FIRMWARE_URL))],
    );
    let session = rig.session();

    assert_eq!(session.check().unwrap(), CheckOutcome::UpToDate);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.last_error(), None);
    assert_eq!(session.snapshot().pending, None);
}

#[test]
fn check_is_repeatable() {
    let rig = Rig::new();
    rig.serve_update(1000);
    let session = rig.session();

    let first = session.check().unwrap();
    let second = session.check().unwrap();
    assert_eq!(first, second);
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 2);
    assert_eq!(rig.slot.begins(), 0, "check never opens the slot");
}

#[test]
fn manifest_request_carries_bearer_token() {
    let rig = Rig::new();
    rig.serve_update(10);
    rig.session().check().unwrap();

    let req = &rig.http.requests()[0];
    assert!(
        req.headers
            .contains(&("Authorization".to_owned(), "Bearer dev-1".to_owned()))
    );
    assert!(
        req.headers
            .contains(&("Content-Type".to_owned(), "application/json".to_owned()))
    );
}

// ── Scenario D: retry ────────────────────────────────────────

#[test]
fn unreachable_server_fails_after_all_attempts() {
    let rig = Rig::new();
    rig.http
        .script(MANIFEST_URL, vec![Reply::Fail(HttpError::Timeout)]);
    let session = rig.session();

    let err = session.check().unwrap_err();
    assert!(matches!(err, OtaError::Transport(_)), "got {err:?}");
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 3);
    assert_eq!(rig.system.sleeps(), vec![100, 100]);
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.last_error().is_some());
    assert!(matches!(
        rig.observer.seen().last(),
        Some(Seen::Error(_))
    ));
}

#[test]
fn server_error_status_is_retried() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![
            Reply::status(503),
            Reply::json(&manifest_json("2.0.0", FIRMWARE_URL)),
        ],
    );
    let session = rig.session();

    assert!(matches!(
        session.check().unwrap(),
        CheckOutcome::UpdateAvailable(_)
    ));
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 2);
    assert_eq!(rig.system.sleeps(), vec![100]);
}

#[test]
fn malformed_manifest_is_not_retried() {
    let rig = Rig::new();
    rig.http
        .script(MANIFEST_URL, vec![Reply::json("{not json")]);
    let session = rig.session();

    let err = session.check().unwrap_err();
    assert!(matches!(err, OtaError::Parse(_)), "got {err:?}");
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn binary_manifest_body_is_a_parse_error() {
    let rig = Rig::new();
    rig.http
        .script(MANIFEST_URL, vec![Reply::image(vec![0xff, 0xfe, 0x00, 0x7b])]);
    let session = rig.session();

    let err = session.check().unwrap_err();
    assert!(matches!(err, OtaError::Parse(_)), "got {err:?}");
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
    assert!(rig.system.sleeps().is_empty());
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn oversized_manifest_body_is_a_parse_error() {
    let rig = Rig::new();
    rig.http
        .script(MANIFEST_URL, vec![Reply::json(&" ".repeat(5_000))]);
    let session = rig.session();

    let err = session.check().unwrap_err();
    assert!(matches!(err, OtaError::Parse(_)), "got {err:?}");
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
    assert!(rig.system.sleeps().is_empty());
}

#[test]
fn failed_session_recovers_on_next_check() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![
            Reply::Fail(HttpError::Timeout),
            Reply::Fail(HttpError::Timeout),
            Reply::Fail(HttpError::Timeout),
            Reply::json(&manifest_json("1.0.0", FIRMWARE_URL)),
        ],
    );
    let session = rig.session();

    assert!(session.check().is_err());
    assert_eq!(session.state(), SessionState::Failed);

    assert_eq!(session.check().unwrap(), CheckOutcome::UpToDate);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.last_error(), None);
}

// ── Bus parameters ───────────────────────────────────────────

#[test]
fn successful_manifest_forwards_bus_params() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("1.0.0", FIRMWARE_URL))],
    );
    rig.session().check().unwrap();

    let params = rig.bus.last_params().expect("params forwarded");
    assert_eq!(params.host, "broker.test");
    assert_eq!(params.port, 1883);
    assert_eq!(params.ws_url, "ws://broker.test/mqtt");
    assert_eq!(params.client_id, "dev-1");
    assert_eq!(
        rig.settings.get_str(BUS_NAMESPACE, KEY_BROKER).unwrap(),
        Some("broker.test".into())
    );
}

#[test]
fn unsuccessful_manifest_forwards_nothing() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(
            r#"{"success":false,"broker_server":"evil","master_version":"9.9.9","master_link":"http://x"}"#,
        )],
    );
    let session = rig.session();

    assert_eq!(session.check().unwrap(), CheckOutcome::UpToDate);
    assert_eq!(rig.bus.last_params(), None);
    assert_eq!(rig.settings.get_str(BUS_NAMESPACE, KEY_BROKER).unwrap(), None);
}

#[test]
fn bus_params_forwarded_when_settings_are_full() {
    let rig = Rig::new();
    rig.serve_update(100);
    rig.settings.fail_writes(true);

    assert!(matches!(
        rig.session().check().unwrap(),
        CheckOutcome::UpdateAvailable(_)
    ));
    assert_eq!(
        rig.bus.last_params().map(|p| p.host),
        Some("broker.test".to_owned())
    );
    assert_eq!(rig.settings.get_str(BUS_NAMESPACE, KEY_BROKER).unwrap(), None);
}

// ── Apply: happy path ────────────────────────────────────────

#[test]
fn forced_apply_installs_and_restarts() {
    let rig = Rig::new();
    let payload = rig.serve_update(1000);
    let session = rig.session();
    rig.system.advance(42_000);

    let outcome = session.apply(true).unwrap();
    let ApplyOutcome::Rebooting { version, report } = outcome else {
        panic!("expected a reboot");
    };
    assert_eq!(version, "2.0.0");
    assert_eq!(report.bytes, 1000);
    assert_eq!(report.sha256, hmac_sha256::Hash::hash(&payload));

    assert_eq!(rig.slot.boot_image(), Some(payload));
    assert_eq!(session.state(), SessionState::Rebooting);
    assert_eq!(rig.system.restarts(), 1);
    assert_eq!(rig.system.sleeps().last(), Some(&3000));
}

#[test]
fn applied_version_is_persisted() {
    let rig = Rig::new();
    rig.serve_update(300);
    let session = rig.session();
    rig.system.advance(42_000);
    session.apply(true).unwrap();

    assert_eq!(
        rig.settings.get_str(OTA_NAMESPACE, KEY_LAST_VERSION).unwrap(),
        Some("2.0.0".into())
    );
    assert_eq!(session.status_line(), "OTA:INFO@2.0.0@42@0@0");

    // A fresh session (after the restart) sees the same record.
    let rebooted = rig.session();
    let snap = rebooted.snapshot();
    assert_eq!(snap.last_applied_version.as_deref(), Some("2.0.0"));
    assert_eq!(snap.last_applied_at.as_deref(), Some("42"));
}

#[test]
fn observers_see_start_progress_and_end() {
    let rig = Rig::new();
    rig.serve_update(1000);
    rig.session().apply(true).unwrap();

    let seen = rig.observer.seen();
    assert_eq!(seen.first(), Some(&Seen::Start("2.0.0".into(), 1000)));
    assert_eq!(seen.last(), Some(&Seen::End(true)));

    let progress = rig.observer.progress();
    // 1000 bytes in 128-byte chunks.
    assert_eq!(progress.len(), 8);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[test]
fn persistence_failure_does_not_block_restart() {
    let rig = Rig::new();
    rig.serve_update(200);
    let session = rig.session();
    rig.settings.fail_writes(true);

    assert!(matches!(
        session.apply(true).unwrap(),
        ApplyOutcome::Rebooting { .. }
    ));
    assert_eq!(rig.system.restarts(), 1);
}

// ── Apply: gating ────────────────────────────────────────────

#[test]
fn unforced_apply_reports_without_downloading() {
    let rig = Rig::new();
    rig.serve_update(1000);
    let session = rig.session();

    match session.apply(false).unwrap() {
        ApplyOutcome::Available(c) => assert_eq!(c.version, "2.0.0"),
        other => panic!("expected Available, got {other:?}"),
    }
    assert_eq!(rig.http.calls_to(FIRMWARE_URL), 0);
    assert_eq!(rig.slot.begins(), 0);
    assert_eq!(rig.system.restarts(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn apply_uses_pending_candidate_without_rechecking() {
    let rig = Rig::new();
    rig.serve_update(100);
    let session = rig.session();

    session.check().unwrap();
    session.apply(true).unwrap();
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
    assert_eq!(rig.http.calls_to(FIRMWARE_URL), 1);
}

#[test]
fn apply_when_up_to_date_does_nothing() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("1.0.0", FIRMWARE_URL))],
    );
    let session = rig.session();

    assert_eq!(session.apply(true).unwrap(), ApplyOutcome::UpToDate);
    assert_eq!(rig.slot.begins(), 0);
}

// ── Scenario C and other download failures ───────────────────

#[test]
fn short_stream_leaves_running_image_bootable() {
    let rig = Rig::new();
    let mut bytes = image(1000);
    bytes.truncate(950);
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("2.0.0", FIRMWARE_URL))],
    );
    rig.http.script(
        FIRMWARE_URL,
        vec![Reply::Ok {
            status: 200,
            content_length: Some(1000),
            body: bytes,
            fail_after: None,
        }],
    );
    let session = rig.session();

    let err = session.apply(true).unwrap_err();
    assert!(matches!(err, OtaError::Io(_)), "got {err:?}");
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.last_error().unwrap().contains("mismatch"));
    assert_eq!(rig.slot.boot_image(), None);
    assert!(!rig.slot.is_open());
    assert_eq!(rig.system.restarts(), 0);
    assert_eq!(rig.observer.seen().last(), Some(&Seen::End(false)));
}

#[test]
fn connection_drop_mid_stream_fails_with_io() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("2.0.0", FIRMWARE_URL))],
    );
    rig.http.script(
        FIRMWARE_URL,
        vec![Reply::Ok {
            status: 200,
            content_length: Some(1000),
            body: image(1000),
            fail_after: Some(950),
        }],
    );
    let session = rig.session();

    assert!(matches!(session.apply(true), Err(OtaError::Io(_))));
    assert_eq!(rig.slot.boot_image(), None);
    assert_eq!(rig.slot.aborts(), 1);
}

#[test]
fn zero_length_image_is_rejected_before_opening_slot() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("2.0.0", FIRMWARE_URL))],
    );
    rig.http
        .script(FIRMWARE_URL, vec![Reply::image(Vec::new())]);
    let session = rig.session();

    let err = session.apply(true).unwrap_err();
    assert_eq!(err, OtaError::Io("Invalid content length".into()));
    assert_eq!(rig.slot.begins(), 0);
}

#[test]
fn image_larger_than_slot_is_refused() {
    let rig = Rig::with_slot_capacity(512);
    rig.serve_update(1000);
    let session = rig.session();

    let err = session.apply(true).unwrap_err();
    assert_eq!(
        err,
        OtaError::InsufficientSpace {
            required: 1000,
            available: 512
        }
    );
    assert_eq!(rig.slot.begins(), 0);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn firmware_http_error_fails_without_writing() {
    let rig = Rig::new();
    rig.http.script(
        MANIFEST_URL,
        vec![Reply::json(&manifest_json("2.0.0", FIRMWARE_URL))],
    );
    rig.http.script(FIRMWARE_URL, vec![Reply::status(404)]);
    let session = rig.session();

    let err = session.apply(true).unwrap_err();
    assert_eq!(err, OtaError::Transport("HTTP error: 404".into()));
    assert_eq!(rig.slot.begins(), 0);
    assert_eq!(rig.http.calls_to(FIRMWARE_URL), 1, "downloads are not retried");
}

#[test]
fn rejected_image_is_a_verification_failure() {
    let rig = Rig::new();
    rig.serve_update(500);
    rig.slot.set_reject_images(true);
    let session = rig.session();

    let err = session.apply(true).unwrap_err();
    assert!(matches!(err, OtaError::Verification(_)), "got {err:?}");
    assert_eq!(rig.slot.boot_image(), None);
    assert_eq!(rig.system.restarts(), 0);
    assert_eq!(
        rig.settings.get_str(OTA_NAMESPACE, KEY_LAST_VERSION).unwrap(),
        None
    );
}

// ── Concurrency: observers calling back in ───────────────────

/// Calls back into the session from the first progress notification.
struct Reentrant {
    session: OnceLock<Weak<UpdateSession<TestPlatform>>>,
    cancel: bool,
    checked: Mutex<Vec<Result<CheckOutcome, OtaError>>>,
    status: Mutex<Option<String>>,
    cancelled: Mutex<Option<bool>>,
}

impl Reentrant {
    fn new(cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            session: OnceLock::new(),
            cancel,
            checked: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            cancelled: Mutex::new(None),
        })
    }

    fn bind(&self, session: &Arc<UpdateSession<TestPlatform>>) {
        let _ = self.session.set(Arc::downgrade(session));
    }
}

impl UpdateObserver for Reentrant {
    fn on_progress(&self, _percent: u8) {
        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut checked = self.checked.lock().unwrap();
        if !checked.is_empty() {
            return;
        }
        checked.push(session.check());
        *self.status.lock().unwrap() = Some(session.status_line());
        if self.cancel {
            *self.cancelled.lock().unwrap() = Some(session.cancel());
        }
    }
}

#[test]
fn second_operation_is_busy_without_io() {
    let rig = Rig::new();
    rig.serve_update(1000);
    let session = rig.session();
    let hook = Reentrant::new(false);
    hook.bind(&session);
    session.attach(hook.clone());

    session.apply(true).unwrap();

    let checked = hook.checked.lock().unwrap();
    assert_eq!(checked.as_slice(), &[Err(OtaError::Busy)]);
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
    let status = hook.status.lock().unwrap().clone().unwrap();
    assert!(status.starts_with("OTA:UPDATING@"), "got {status}");
}

#[test]
fn cancel_aborts_stream_and_keeps_running_image() {
    let rig = Rig::new();
    rig.serve_update(1000);
    let session = rig.session();
    let hook = Reentrant::new(true);
    hook.bind(&session);
    session.attach(hook.clone());

    assert_eq!(session.apply(true).unwrap_err(), OtaError::Aborted);
    assert_eq!(*hook.cancelled.lock().unwrap(), Some(true));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(rig.slot.boot_image(), None);
    assert_eq!(rig.slot.aborts(), 1);
    assert_eq!(rig.system.restarts(), 0);
}

#[test]
fn cancel_when_idle_is_a_no_op() {
    let rig = Rig::new();
    let session = rig.session();
    assert!(!session.cancel());
    assert_eq!(session.state(), SessionState::Idle);
}

// ── Connectivity ─────────────────────────────────────────────

#[test]
fn check_while_offline_fails_fast() {
    let rig = Rig::new();
    rig.serve_update(100);
    rig.network.set_connected(false);
    let session = rig.session();

    let err = session.check().unwrap_err();
    assert_eq!(err, OtaError::Transport("WiFi not connected".into()));
    assert!(rig.http.requests().is_empty());
    assert!(rig.system.sleeps().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.snapshot().last_check_ms, None);
}

#[test]
fn apply_while_offline_downloads_nothing() {
    let rig = Rig::new();
    rig.serve_update(100);
    let session = rig.session();
    assert!(matches!(
        session.check().unwrap(),
        CheckOutcome::UpdateAvailable(_)
    ));
    rig.network.set_connected(false);

    let err = session.apply(true).unwrap_err();
    assert_eq!(err, OtaError::Transport("WiFi not connected".into()));
    assert_eq!(rig.http.calls_to(FIRMWARE_URL), 0);
    assert_eq!(rig.slot.begins(), 0);
    assert_eq!(rig.system.restarts(), 0);
    assert!(session.snapshot().pending.is_some());
}

#[test]
fn check_resumes_once_link_returns() {
    let rig = Rig::new();
    rig.serve_update(100);
    rig.network.set_connected(false);
    let session = rig.session();
    assert!(session.check().is_err());

    rig.network.set_connected(true);
    assert!(matches!(
        session.check().unwrap(),
        CheckOutcome::UpdateAvailable(_)
    ));
    assert_eq!(rig.http.calls_to(MANIFEST_URL), 1);
}

// ── Auto-update flag ─────────────────────────────────────────

#[test]
fn auto_update_flag_survives_restart() {
    let rig = Rig::new();
    let session = rig.session();
    assert!(!session.auto_update());

    session.set_auto_update(true).unwrap();
    assert!(session.auto_update());
    assert!(rig.session().auto_update());
}

#[test]
fn auto_update_flag_changes_even_if_store_fails() {
    let rig = Rig::new();
    let session = rig.session();
    rig.settings.fail_writes(true);

    assert!(session.set_auto_update(true).is_err());
    assert!(session.auto_update());
}
