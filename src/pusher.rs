use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::callback::PushCallback;
use super::error::{Error, Result};
use super::power::{PowerManager, WakeGuard};
use super::store::{FolderIdler, IdleResult, MailStore};

/// Listens for changes to one folder in a dedicated thread.
///
/// A pusher is single-use: [`start`](ImapFolderPusher::start) spawns its worker thread once, and
/// after [`stop`](ImapFolderPusher::stop) it never runs again. To resume pushing a folder, create
/// a new pusher.
///
/// The worker holds a wake lock for its whole run. It first reports a change unconditionally, so
/// that anything that happened while nobody was listening gets synchronized, then opens an idle
/// session through the [`MailStore`] and reports every change the session sees. If opening the
/// session or waiting on it fails, the error is reported once and the worker exits; retrying is up
/// to the [`PushCallback`].
///
/// Stopping is asynchronous. `stop` interrupts a blocked wait, but a change that the session saw
/// just before `stop` was called may still be reported once afterwards.
pub struct ImapFolderPusher {
    inner: Arc<Inner>,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    store: Arc<dyn MailStore>,
    power_manager: Arc<dyn PowerManager>,
    callback: Arc<dyn PushCallback>,
    account_name: String,
    folder_server_id: String,
    idle_refresh_timeout: Duration,
    stop_pushing: AtomicBool,
    folder_idler: Mutex<Option<Arc<dyn FolderIdler>>>,
}

impl ImapFolderPusher {
    /// Create a pusher for `folder_server_id` of `account_name`.
    ///
    /// `idle_refresh_timeout` is handed to the store when the idle session is opened.
    pub fn new(
        store: Arc<dyn MailStore>,
        power_manager: Arc<dyn PowerManager>,
        callback: Arc<dyn PushCallback>,
        account_name: impl Into<String>,
        folder_server_id: impl Into<String>,
        idle_refresh_timeout: Duration,
    ) -> ImapFolderPusher {
        ImapFolderPusher {
            inner: Arc::new(Inner {
                store,
                power_manager,
                callback,
                account_name: account_name.into(),
                folder_server_id: folder_server_id.into(),
                idle_refresh_timeout,
                stop_pushing: AtomicBool::new(false),
                folder_idler: Mutex::new(None),
            }),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// The account this pusher belongs to.
    pub fn account_name(&self) -> &str {
        &self.inner.account_name
    }

    /// The folder this pusher watches.
    pub fn folder_server_id(&self) -> &str {
        &self.inner.folder_server_id
    }

    /// Spawn the worker thread and return immediately.
    ///
    /// Fails with [`Error::AlreadyStarted`] if called more than once.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        trace!(
            "Starting ImapFolderPusher for {} / {}",
            self.inner.account_name,
            self.inner.folder_server_id
        );

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(self.inner.name())
            .spawn(move || {
                trace!(
                    "Starting ImapFolderPusher thread for {} / {}",
                    inner.account_name,
                    inner.folder_server_id
                );

                inner.run_push_loop();

                trace!(
                    "Exiting ImapFolderPusher thread for {} / {}",
                    inner.account_name,
                    inner.folder_server_id
                );
            })?;

        *self.lock_worker() = Some(handle);
        Ok(())
    }

    /// Ask the worker to stop, without waiting for it.
    ///
    /// May be called from any thread, any number of times, before or after `start`.
    pub fn stop(&self) {
        trace!(
            "Stopping ImapFolderPusher for {} / {}",
            self.inner.account_name,
            self.inner.folder_server_id
        );

        self.inner.stop_pushing.store(true, Ordering::SeqCst);
        if let Some(folder_idler) = self.inner.current_idler() {
            folder_idler.stop();
        }
    }

    /// Block until the worker thread has exited.
    ///
    /// Returns immediately if the pusher was never started or was already joined.
    pub fn join(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(
                    "ImapFolderPusher thread for {} / {} panicked",
                    self.inner.account_name, self.inner.folder_server_id
                );
            }
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ImapFolderPusher {
    fn drop(&mut self) {
        // an unowned worker would otherwise idle, and hold its wake lock, forever
        self.stop();
    }
}

impl std::fmt::Debug for ImapFolderPusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapFolderPusher")
            .field("account_name", &self.inner.account_name)
            .field("folder_server_id", &self.inner.folder_server_id)
            .field("idle_refresh_timeout", &self.inner.idle_refresh_timeout)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.inner.should_stop())
            .finish()
    }
}

impl Inner {
    fn name(&self) -> String {
        format!(
            "ImapFolderPusher-{}-{}",
            self.account_name, self.folder_server_id
        )
    }

    fn should_stop(&self) -> bool {
        self.stop_pushing.load(Ordering::SeqCst)
    }

    fn lock_idler(&self) -> MutexGuard<'_, Option<Arc<dyn FolderIdler>>> {
        self.folder_idler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_idler(&self) -> Option<Arc<dyn FolderIdler>> {
        self.lock_idler().clone()
    }

    fn set_idler(&self, folder_idler: Option<Arc<dyn FolderIdler>>) {
        *self.lock_idler() = folder_idler;
    }

    fn run_push_loop(&self) {
        // released after the idler is dropped, whichever way this returns
        let _wake_guard = WakeGuard::acquire(&*self.power_manager, &self.name());

        self.perform_initial_sync();

        if self.should_stop() {
            debug!(
                "ImapFolderPusher for {} / {} stopped before idling",
                self.account_name, self.folder_server_id
            );
            return;
        }

        let folder_idler: Arc<dyn FolderIdler> = match self
            .store
            .create_folder_idler(&self.folder_server_id, self.idle_refresh_timeout)
        {
            Ok(folder_idler) => Arc::from(folder_idler),
            Err(e) => return self.report_error(e),
        };

        self.set_idler(Some(Arc::clone(&folder_idler)));
        if self.should_stop() {
            // stop() ran before the idler was visible to it
            folder_idler.stop();
        }

        let result = self.idle_until_stopped(&*folder_idler);
        self.set_idler(None);

        if let Err(e) = result {
            self.report_error(e);
        }
    }

    fn perform_initial_sync(&self) {
        self.callback.on_push_event(&self.folder_server_id);
    }

    fn idle_until_stopped(&self, folder_idler: &dyn FolderIdler) -> Result<()> {
        while !self.should_stop() {
            match folder_idler.idle()? {
                IdleResult::Sync => self.callback.on_push_event(&self.folder_server_id),
                IdleResult::NoChange => trace!(
                    "No change in {} / {}, idling again",
                    self.account_name,
                    self.folder_server_id
                ),
                IdleResult::Stopped => {
                    // a stopped idler never blocks again
                    trace!(
                        "Idle for {} / {} was interrupted",
                        self.account_name,
                        self.folder_server_id
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    fn report_error(&self, error: Error) {
        debug!(
            "Error in ImapFolderPusher for {} / {}: {}",
            self.account_name, self.folder_server_id, error
        );

        self.callback.on_push_error(&self.folder_server_id, error);
    }
}
