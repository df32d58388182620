//! Mock platform for integration tests.
//!
//! Scripted HTTP replies, a virtual clock that advances on sleep, and
//! shared-state wrappers around the crate's simulation adapters so tests
//! can inspect the slot, settings and bus after the session has taken
//! ownership of its ports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use otaflow::adapters::bus_status::LogBus;
use otaflow::adapters::flash_slot::SimSlot;
use otaflow::adapters::nvs::NvsSettings;
use otaflow::adapters::wifi::SimLink;
use otaflow::app::ports::{
    BodyReader, HttpError, HttpPort, HttpResponse, OtaPlatform, Ports, SettingsPort,
    StorageError, SystemPort, UpdateObserver,
};
use otaflow::app::session::UpdateSession;
use otaflow::config::OtaConfig;
use otaflow::policy::RetryPolicy;

pub const MANIFEST_URL: &str = "http://ota.test/api/version";
pub const FIRMWARE_URL: &str = "http://ota.test/fw/master-2.0.0.bin";

// ── HTTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Reply {
    /// Connection-level failure.
    Fail(HttpError),
    Ok {
        status: u16,
        content_length: Option<u64>,
        body: Vec<u8>,
        /// Body read errors once this many bytes have been delivered.
        fail_after: Option<usize>,
    },
}

impl Reply {
    pub fn json(body: &str) -> Self {
        Self::Ok {
            status: 200,
            content_length: Some(body.len() as u64),
            body: body.as_bytes().to_vec(),
            fail_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Ok {
            status,
            content_length: Some(0),
            body: Vec::new(),
            fail_after: None,
        }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::Ok {
            status: 200,
            content_length: Some(bytes.len() as u64),
            body: bytes,
            fail_after: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
struct HttpState {
    replies: HashMap<String, VecDeque<Reply>>,
    requests: Vec<Request>,
}

/// Scripted HTTP client.  Each URL has a reply queue; the last reply is
/// sticky once the queue is down to one.
#[derive(Clone, Default)]
pub struct MockHttp {
    state: Arc<Mutex<HttpState>>,
}

impl MockHttp {
    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(url.to_owned(), replies.into());
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

impl HttpPort for MockHttp {
    type Body = MockBody;

    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse<MockBody>, HttpError> {
        let mut s = self.state.lock().unwrap();
        s.requests.push(Request {
            url: url.to_owned(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        });
        let queue = s
            .replies
            .get_mut(url)
            .ok_or_else(|| HttpError::Connect(format!("no route to {url}")))?;
        let reply = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| HttpError::Connect("no reply scripted".into()))?
        };
        match reply {
            Reply::Fail(e) => Err(e),
            Reply::Ok {
                status,
                content_length,
                body,
                fail_after,
            } => Ok(HttpResponse {
                status,
                content_length,
                body: MockBody {
                    data: body,
                    pos: 0,
                    fail_after,
                },
            }),
        }
    }
}

pub struct MockBody {
    data: Vec<u8>,
    pos: usize,
    fail_after: Option<usize>,
}

impl BodyReader for MockBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let limit = self.fail_after.unwrap_or(self.data.len()).min(self.data.len());
        if self.pos >= limit {
            if self.fail_after.is_some() {
                return Err(HttpError::Io("connection reset by peer".into()));
            }
            return Ok(0);
        }
        let n = buf.len().min(limit - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ── Settings ──────────────────────────────────────────────────

/// Shared NVS simulation with a switch to make every write fail.
#[derive(Clone)]
pub struct SharedSettings {
    inner: Arc<NvsSettings>,
    fail_writes: Arc<AtomicBool>,
}

impl SharedSettings {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NvsSettings::new().unwrap()),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Full)
        } else {
            Ok(())
        }
    }
}

impl SettingsPort for SharedSettings {
    fn get_str(&self, ns: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_str(ns, key)
    }
    fn set_str(&self, ns: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.writable()?;
        self.inner.set_str(ns, key, value)
    }
    fn get_i32(&self, ns: &str, key: &str) -> Result<Option<i32>, StorageError> {
        self.inner.get_i32(ns, key)
    }
    fn set_i32(&self, ns: &str, key: &str, value: i32) -> Result<(), StorageError> {
        self.writable()?;
        self.inner.set_i32(ns, key, value)
    }
    fn get_bool(&self, ns: &str, key: &str) -> Result<Option<bool>, StorageError> {
        self.inner.get_bool(ns, key)
    }
    fn set_bool(&self, ns: &str, key: &str, value: bool) -> Result<(), StorageError> {
        self.writable()?;
        self.inner.set_bool(ns, key, value)
    }
    fn commit(&self, ns: &str) -> Result<(), StorageError> {
        self.writable()?;
        self.inner.commit(ns)
    }
}

// ── System ────────────────────────────────────────────────────

/// Virtual clock: `sleep_ms` advances time instantly and is recorded.
#[derive(Clone, Default)]
pub struct MockSystem {
    now: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<u64>>>,
    restarts: Arc<AtomicU32>,
}

impl MockSystem {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn sleeps(&self) -> Vec<u64> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl SystemPort for MockSystem {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.sleeps.lock().unwrap().push(ms);
        self.advance(ms);
    }

    fn timestamp(&self) -> String {
        (self.now_ms() / 1000).to_string()
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Observer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Start(String, u32),
    Progress(u8),
    End(bool),
    Error(String),
}

#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingObserver {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl UpdateObserver for RecordingObserver {
    fn on_start(&self, version: &str, total_bytes: u32) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Start(version.to_owned(), total_bytes));
    }
    fn on_progress(&self, percent: u8) {
        self.seen.lock().unwrap().push(Seen::Progress(percent));
    }
    fn on_end(&self, success: bool) {
        self.seen.lock().unwrap().push(Seen::End(success));
    }
    fn on_error(&self, message: &str) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Error(message.to_owned()));
    }
}

// ── Platform + rig ────────────────────────────────────────────

pub struct TestPlatform;

impl OtaPlatform for TestPlatform {
    type Network = SimLink;
    type Http = MockHttp;
    type Slot = SimSlot;
    type Settings = SharedSettings;
    type Bus = LogBus;
    type System = MockSystem;
}

pub fn test_config() -> OtaConfig {
    OtaConfig {
        server_url: MANIFEST_URL.into(),
        client_id: "dev-1".into(),
        current_version: "Master-1.0.0".into(),
        retry: RetryPolicy {
            max_attempts: 3,
            delay_ms: 100,
        },
        ..OtaConfig::default()
    }
}

pub fn manifest_json(version: &str, link: &str) -> String {
    format!(
        r#"{{"success":true,"broker_server":"broker.test","broker_port":1883,"ws_url":"ws://broker.test/mqtt","master_version":"{version}","master_link":"{link}","slave_version":"","slave_link":""}}"#
    )
}

/// Deterministic image payload.
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Every adapter a session needs, with shared handles kept for asserts.
pub struct Rig {
    pub network: SimLink,
    pub http: MockHttp,
    pub slot: SimSlot,
    pub settings: SharedSettings,
    pub bus: LogBus,
    pub system: MockSystem,
    pub observer: Arc<RecordingObserver>,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            network: SimLink::new(true),
            http: MockHttp::default(),
            slot: SimSlot::new(64 * 1024),
            settings: SharedSettings::new(),
            bus: LogBus::new(),
            system: MockSystem::default(),
            observer: Arc::new(RecordingObserver::default()),
        }
    }

    pub fn with_slot_capacity(capacity: u32) -> Self {
        Self {
            slot: SimSlot::new(capacity),
            ..Self::new()
        }
    }

    pub fn session(&self) -> Arc<UpdateSession<TestPlatform>> {
        self.session_with(&test_config())
    }

    pub fn session_with(&self, config: &OtaConfig) -> Arc<UpdateSession<TestPlatform>> {
        let ports = Ports::<TestPlatform> {
            network: self.network.clone(),
            http: self.http.clone(),
            slot: self.slot.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            system: self.system.clone(),
        };
        let session = Arc::new(UpdateSession::new(config, ports));
        session.attach(self.observer.clone());
        session
    }

    /// Manifest advertising 2.0.0 and a firmware of `len` bytes.
    pub fn serve_update(&self, len: usize) -> Vec<u8> {
        let bytes = image(len);
        self.http.script(
            MANIFEST_URL,
            vec![Reply::json(&manifest_json("2.0.0", FIRMWARE_URL))],
        );
        self.http
            .script(FIRMWARE_URL, vec![Reply::image(bytes.clone())]);
        bytes
    }
}
