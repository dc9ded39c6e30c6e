//! Enable the test_helpers feature to expose scripted collaborators for testing code that drives
//! an [`ImapFolderPusher`](crate::ImapFolderPusher) without a real server or power manager.
//!
//! To use add a dev-dependency on the crate adding the feature "test_helpers"
//! e.g.
//!
//! ```toml
//! [dependencies]
//! imap-push = { version = "0.1" }
//!
//! [dev-dependencies]
//! # mirror the same configuration your dependencies and add test_helpers
//! imap-push = { version = "0.1", features = ["test_helpers"] }
//! ```
//!
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::callback::PushCallback;
use crate::error::{Error, Result};
use crate::power::{PowerManager, WakeLock};
use crate::store::{FolderIdler, IdleResult, MailStore};

/// A call received by a [`RecordingCallback`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushEvent {
    /// `on_push_event(folder)`
    Sync(String),
    /// `on_push_error(folder, error.to_string())`
    Error(String, String),
}

/// A [`PushCallback`] that remembers every call, in order.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<PushEvent>>,
    cond: Condvar,
}

impl RecordingCallback {
    /// Everything received so far.
    pub fn events(&self) -> Vec<PushEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` calls were received, or `timeout` passed, and return what was
    /// received.
    pub fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<PushEvent> {
        let events = self.events.lock().unwrap();
        let (events, _) = self
            .cond
            .wait_timeout_while(events, timeout, |events| events.len() < count)
            .unwrap();
        events.clone()
    }

    fn record(&self, event: PushEvent) {
        self.events.lock().unwrap().push(event);
        self.cond.notify_all();
    }
}

impl PushCallback for RecordingCallback {
    fn on_push_event(&self, folder_server_id: &str) {
        self.record(PushEvent::Sync(folder_server_id.to_string()));
    }

    fn on_push_error(&self, folder_server_id: &str, error: Error) {
        self.record(PushEvent::Error(
            folder_server_id.to_string(),
            error.to_string(),
        ));
    }
}

/// A [`PowerManager`] that counts how often its locks are acquired and released.
#[derive(Clone, Debug, Default)]
pub struct CountingPowerManager {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    tags: Arc<Mutex<Vec<String>>>,
}

impl CountingPowerManager {
    /// Number of `acquire` calls across all locks handed out.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of `release` calls across all locks handed out.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tags of all locks handed out, in order.
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

struct CountingWakeLock {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl WakeLock for CountingWakeLock {
    fn acquire(&mut self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl PowerManager for CountingPowerManager {
    fn new_wake_lock(&self, tag: &str) -> Box<dyn WakeLock> {
        self.tags.lock().unwrap().push(tag.to_string());
        Box::new(CountingWakeLock {
            acquired: Arc::clone(&self.acquired),
            released: Arc::clone(&self.released),
        })
    }
}

/// One scripted outcome of [`FolderIdler::idle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Return [`IdleResult::Sync`].
    Sync,
    /// Return [`IdleResult::NoChange`].
    NoChange,
    /// Fail with [`Error::Store`] carrying this message.
    Fail(String),
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    idle_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    requests: Mutex<Vec<(String, Duration)>>,
}

/// A [`MailStore`] whose idlers play back a fixed script and then block until stopped.
#[derive(Debug)]
pub struct ScriptedStore {
    script: Mutex<Vec<Step>>,
    create_error: Option<String>,
    counters: Arc<Counters>,
}

impl ScriptedStore {
    /// The first idler created plays back `script`; later ones start out empty.
    pub fn new(script: Vec<Step>) -> ScriptedStore {
        ScriptedStore {
            script: Mutex::new(script),
            create_error: None,
            counters: Arc::default(),
        }
    }

    /// A store that fails every `create_folder_idler` call with `message`.
    pub fn failing(message: &str) -> ScriptedStore {
        ScriptedStore {
            script: Mutex::new(Vec::new()),
            create_error: Some(message.to_string()),
            counters: Arc::default(),
        }
    }

    /// Number of idlers handed out.
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Number of `idle` calls across all idlers.
    pub fn idle_calls(&self) -> usize {
        self.counters.idle_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls across all idlers.
    pub fn stop_calls(&self) -> usize {
        self.counters.stop_calls.load(Ordering::SeqCst)
    }

    /// `(folder, refresh timeout)` of every `create_folder_idler` call, including failed ones.
    pub fn requests(&self) -> Vec<(String, Duration)> {
        self.counters.requests.lock().unwrap().clone()
    }
}

impl MailStore for ScriptedStore {
    fn create_folder_idler(
        &self,
        folder_server_id: &str,
        idle_refresh_timeout: Duration,
    ) -> Result<Box<dyn FolderIdler>> {
        self.counters
            .requests
            .lock()
            .unwrap()
            .push((folder_server_id.to_string(), idle_refresh_timeout));
        if let Some(ref message) = self.create_error {
            return Err(Error::store(message.clone()));
        }

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        Ok(Box::new(ScriptedIdler {
            state: Mutex::new(IdlerState {
                script: script.into(),
                stopped: false,
            }),
            cond: Condvar::new(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct IdlerState {
    script: VecDeque<Step>,
    stopped: bool,
}

struct ScriptedIdler {
    state: Mutex<IdlerState>,
    cond: Condvar,
    counters: Arc<Counters>,
}

impl FolderIdler for ScriptedIdler {
    fn idle(&self) -> Result<IdleResult> {
        self.counters.idle_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return Ok(IdleResult::Stopped);
            }
            match state.script.pop_front() {
                Some(Step::Sync) => return Ok(IdleResult::Sync),
                Some(Step::NoChange) => return Ok(IdleResult::NoChange),
                Some(Step::Fail(message)) => return Err(Error::store(message)),
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    fn stop(&self) {
        self.counters.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().stopped = true;
        self.cond.notify_all();
    }
}
