//! This module contains types used throughout the IMAP protocol.

mod capabilities;
pub use self::capabilities::Capabilities;
