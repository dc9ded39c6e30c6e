//! Push notifications for individual IMAP folders.
//!
//! An [`ImapFolderPusher`] watches one folder of one account from a dedicated thread. It keeps an
//! [`IDLE`](https://tools.ietf.org/html/rfc2177) session open on the folder and tells a
//! [`PushCallback`] whenever the folder changes, or that watching it has failed. What to do about
//! a change (usually: synchronize the folder) is entirely up to the callback.
//!
//! The pusher talks to its surroundings through three traits:
//!
//!  - [`MailStore`] opens the idle session. [`ImapStore`] is the IMAP implementation.
//!  - [`PowerManager`] hands out a wake lock that is held while the pusher runs.
//!    [`NoopPowerManager`] is enough where the host never suspends.
//!  - [`PushCallback`] receives the results.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use imap_push::{
//!     Error, ImapFolderPusher, ImapStoreBuilder, NoopPowerManager, PushCallback,
//!     DEFAULT_IDLE_REFRESH_TIMEOUT,
//! };
//!
//! struct Synchronizer;
//!
//! impl PushCallback for Synchronizer {
//!     fn on_push_event(&self, folder: &str) {
//!         println!("{} changed, synchronizing", folder);
//!     }
//!
//!     fn on_push_error(&self, folder: &str, error: Error) {
//!         eprintln!("pushing {} failed: {}", folder, error);
//!     }
//! }
//!
//! let store = ImapStoreBuilder::new("imap.example.com", 993)
//!     .credentials("me@example.com", "password")
//!     .build();
//!
//! let pusher = ImapFolderPusher::new(
//!     Arc::new(store),
//!     Arc::new(NoopPowerManager),
//!     Arc::new(Synchronizer),
//!     "me@example.com",
//!     "INBOX",
//!     DEFAULT_IDLE_REFRESH_TIMEOUT,
//! );
//! pusher.start().unwrap();
//!
//! // ... later
//! pusher.stop();
//! pusher.join();
//! ```

#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod callback;
mod imap_store;
mod parse;
mod power;
mod pusher;
mod store;

pub mod client;
mod conn;
pub mod error;
pub mod extensions;
pub mod types;

pub use crate::callback::PushCallback;
pub use crate::client::Client;
pub use crate::conn::{Connection, ImapConnection};
pub use crate::error::{Error, Result};
pub use crate::imap_store::{
    ImapFolderIdler, ImapStore, ImapStoreBuilder, Security, DEFAULT_IDLE_REFRESH_TIMEOUT,
};
pub use crate::power::{NoopPowerManager, PowerManager, WakeGuard, WakeLock};
pub use crate::pusher::ImapFolderPusher;
pub use crate::store::{FolderIdler, IdleResult, MailStore};

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;

#[cfg(test)]
mod mock_stream;
