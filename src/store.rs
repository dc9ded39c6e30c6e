//! The mail store side of folder pushing.
//!
//! A [`MailStore`] knows how to open a long-lived `IDLE` session for one folder; the resulting
//! [`FolderIdler`] is then driven by an [`ImapFolderPusher`](crate::ImapFolderPusher) one idle
//! cycle at a time. [`ImapStore`](crate::ImapStore) is the IMAP implementation, but anything that
//! can block until a folder changes will do.

use std::time::Duration;

use crate::error::Result;

/// The result of a single call to [`FolderIdler::idle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdleResult {
    /// The folder changed on the server and needs to be synchronized.
    Sync,
    /// The idle cycle ended without news, typically because the refresh timeout expired and the
    /// session renewed its `IDLE`.
    NoChange,
    /// [`FolderIdler::stop`] interrupted the wait.
    Stopped,
}

/// A session that can block until its folder changes.
///
/// `idle` is only ever called from one thread at a time, but `stop` may be called from any thread
/// while `idle` is blocked, and must make that call return promptly.
pub trait FolderIdler: Send + Sync {
    /// Block for one idle cycle.
    ///
    /// Returning [`IdleResult::Stopped`] ends the pusher's run.
    ///
    /// Implementations are responsible for renewing the server-side idle command before the
    /// server's own inactivity limit expires; returning [`IdleResult::NoChange`] after each
    /// renewal is fine.
    fn idle(&self) -> Result<IdleResult>;

    /// Interrupt a blocked [`idle`](FolderIdler::idle) and make further calls return
    /// [`IdleResult::Stopped`].
    ///
    /// Must not block, and must be safe to call more than once.
    fn stop(&self);
}

/// Something that can open [`FolderIdler`]s.
pub trait MailStore: Send + Sync {
    /// Open a session watching `folder_server_id`.
    ///
    /// `idle_refresh_timeout` is the longest a single idle cycle may block before the session
    /// re-issues its idle command.
    fn create_folder_idler(
        &self,
        folder_server_id: &str,
        idle_refresh_timeout: Duration,
    ) -> Result<Box<dyn FolderIdler>>;
}
