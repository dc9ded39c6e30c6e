//! Adds support for the IMAP IDLE command specificed in [RFC
//! 2177](https://tools.ietf.org/html/rfc2177).

use crate::client::{is_timeout, Client};
use crate::error::{Error, ParseError, Result};
use crate::parse::{self, IdleEvent};
use log::trace;
#[cfg(feature = "native-tls")]
use native_tls::TlsStream;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// How a single `IDLE` wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server reported a change to the selected mailbox.
    MailboxChanged,
    /// Nothing happened before the timeout expired; the `IDLE` was ended so that it can be
    /// re-issued.
    TimedOut,
}

/// `Handle` allows a client to block waiting for changes to the remote mailbox.
///
/// The handle blocks using the [`IDLE` command](https://tools.ietf.org/html/rfc2177#section-3)
/// specificed in [RFC 2177](https://tools.ietf.org/html/rfc2177) until the underlying server state
/// changes in some way. The kind of change is not reported; `EXISTS`, `RECENT`, `EXPUNGE`,
/// `FETCH` and `VANISHED` responses all count as "the folder changed".
///
/// Note that the server MAY consider a client inactive if it has an IDLE command running, and if
/// such a server has an inactivity timeout it MAY log the client off implicitly at the end of its
/// timeout period. Because of that, clients using IDLE are advised to terminate the IDLE and
/// re-issue it at least every 29 minutes to avoid being logged off. [`Handle::wait_timeout`]
/// ends the `IDLE` when its timeout expires so the caller can start a fresh one.
///
/// As long as a [`Handle`] is active, the mailbox cannot be otherwise accessed.
#[derive(Debug)]
pub struct Handle<'a, T: Read + Write + 'a> {
    client: &'a mut Client<T>,
    done: bool,
    changed_early: bool,
}

/// Must be implemented for a transport in order for a `Client` using that transport to support
/// operations with timeouts.
///
/// See also `std::net::TcpStream::set_read_timeout`.
pub trait SetReadTimeout {
    /// Set the timeout for subsequent reads to the given one.
    ///
    /// If `timeout` is `None`, the read timeout should be removed.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

impl<'a, T: Read + Write + 'a> Handle<'a, T> {
    pub(crate) fn make(client: &'a mut Client<T>) -> Result<Self> {
        let mut h = Handle {
            client,
            done: true,
            changed_early: false,
        };
        h.init()?;
        Ok(h)
    }

    fn init(&mut self) -> Result<()> {
        // https://tools.ietf.org/html/rfc2177
        //
        // The IDLE command takes no arguments.
        self.client.run_command("IDLE")?;

        // A tagged response will be sent either
        //
        //   a) if there's an error, or
        //   b) *after* we send DONE
        //
        // Some servers flush pending untagged data before the continuation.
        loop {
            let mut v = Vec::new();
            self.client.readline(&mut v)?;
            if v.starts_with(b"+") {
                self.done = false;
                return Ok(());
            }

            match parse::parse_idle(&v)? {
                IdleEvent::MailboxChanged => self.changed_early = true,
                IdleEvent::Bye => return Err(Error::ConnectionLost),
                IdleEvent::Other if v.starts_with(b"*") => {}
                _ => {
                    // We should *only* get a tagged response on an error (i.e., it gives BAD or
                    // NO).
                    self.client.read_response_onto(&mut v)?;
                    return Err(Error::Parse(ParseError::Invalid(v)));
                }
            }
        }
    }

    fn terminate(&mut self) -> Result<Vec<u8>> {
        self.terminate_onto(Vec::new())
    }

    /// Send `DONE` and read up to the tagged completion.
    ///
    /// `pending` holds the start of a line that was cut off by a read timeout. The returned bytes
    /// are every untagged response the server sent before completing the `IDLE`.
    fn terminate_onto(&mut self, mut pending: Vec<u8>) -> Result<Vec<u8>> {
        if self.done {
            return Ok(Vec::new());
        }

        self.done = true;
        self.client.write_line(b"DONE")?;
        self.client.read_response_onto(&mut pending)?;
        Ok(pending)
    }

    /// Internal helper that doesn't consume self.
    fn wait_inner(&mut self) -> Result<WaitOutcome> {
        if self.changed_early {
            self.terminate()?;
            return Ok(WaitOutcome::MailboxChanged);
        }

        let mut buffer = Vec::new();
        loop {
            match self.client.readline(&mut buffer) {
                Err(ref e) if is_timeout(e) => {
                    trace!("IDLE timed out, sending DONE");
                    let drained = self.terminate_onto(buffer)?;
                    if parse::has_mailbox_change(&drained)? {
                        return Ok(WaitOutcome::MailboxChanged);
                    }
                    return Ok(WaitOutcome::TimedOut);
                }
                Err(err) => return Err(err),
                Ok(_) => match parse::parse_idle(&buffer)? {
                    IdleEvent::MailboxChanged => {
                        self.terminate()?;
                        return Ok(WaitOutcome::MailboxChanged);
                    }
                    IdleEvent::Bye => {
                        self.done = true;
                        return Err(Error::ConnectionLost);
                    }
                    IdleEvent::Incomplete => {}
                    IdleEvent::Other => buffer.clear(),
                },
            }
        }
    }

    /// Block until the selected mailbox changes.
    pub fn wait(mut self) -> Result<WaitOutcome> {
        self.wait_inner()
    }
}

impl<'a, T: SetReadTimeout + Read + Write + 'a> Handle<'a, T> {
    /// Block until the selected mailbox changes, or until the given amount of time has expired.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<WaitOutcome> {
        self.client
            .stream
            .get_mut()
            .set_read_timeout(Some(timeout))?;
        let res = self.wait_inner();
        let _ = self.client.stream.get_mut().set_read_timeout(None);
        res
    }
}

impl<'a, T: Read + Write + 'a> Drop for Handle<'a, T> {
    fn drop(&mut self) {
        // we don't want to panic here if we can't terminate the Idle
        let _ = self.terminate();
    }
}

impl SetReadTimeout for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout).map_err(Error::Io)
    }
}

#[cfg(feature = "native-tls")]
impl<T: SetReadTimeout + Read + Write> SetReadTimeout for TlsStream<T> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.get_mut().set_read_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::MockStream;

    #[test]
    fn wait_for_exists() {
        let response = b"+ idling\r\n\
                         * 4 EXISTS\r\n\
                         a1 OK IDLE terminated\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        let outcome = client.idle().unwrap().wait().unwrap();
        assert_eq!(outcome, WaitOutcome::MailboxChanged);
        assert_eq!(
            client.stream.get_ref().written_buf,
            b"a1 IDLE\r\nDONE\r\n".to_vec()
        );
    }

    #[test]
    fn wait_skips_keepalive_chatter() {
        let response = b"+ idling\r\n\
                         * OK Still here\r\n\
                         * 3 EXPUNGE\r\n\
                         * 2 EXISTS\r\n\
                         a1 OK IDLE terminated\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        let outcome = client.idle().unwrap().wait().unwrap();
        assert_eq!(outcome, WaitOutcome::MailboxChanged);
    }

    #[test]
    fn wait_timeout_returns_timed_out() {
        let response = b"+ idling\r\n".to_vec();
        let mock = MockStream::new(response)
            .with_timeout_on_exhaust()
            .with_reply_after_timeout(b"a1 OK IDLE terminated\r\n".to_vec());
        let mut client = Client::new(mock);
        let outcome = client
            .idle()
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        let mock = client.stream.get_ref();
        assert_eq!(mock.written_buf, b"a1 IDLE\r\nDONE\r\n".to_vec());
        assert_eq!(mock.read_timeouts, vec![Some(Duration::from_secs(60)), None]);
    }

    #[test]
    fn change_while_ending_timed_out_idle() {
        let mock = MockStream::new(b"+ idling\r\n".to_vec())
            .with_timeout_on_exhaust()
            .with_reply_after_timeout(b"* 7 EXISTS\r\na1 OK IDLE terminated\r\n".to_vec());
        let mut client = Client::new(mock);
        let outcome = client
            .idle()
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::MailboxChanged);
        assert_eq!(
            client.stream.get_ref().written_buf,
            b"a1 IDLE\r\nDONE\r\n".to_vec()
        );
    }

    #[test]
    fn timeout_mid_line_keeps_partial_line() {
        let mock = MockStream::new(b"+ idling\r\n* 7 EXI".to_vec())
            .with_timeout_on_exhaust()
            .with_reply_after_timeout(b"STS\r\na1 OK IDLE terminated\r\n".to_vec());
        let mut client = Client::new(mock);
        let outcome = client
            .idle()
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::MailboxChanged);
    }

    #[test]
    fn keepalive_while_ending_timed_out_idle() {
        let mock = MockStream::new(b"+ idling\r\n".to_vec())
            .with_timeout_on_exhaust()
            .with_reply_after_timeout(b"* OK Still here\r\na1 OK IDLE terminated\r\n".to_vec());
        let mut client = Client::new(mock);
        let outcome = client
            .idle()
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn change_before_continuation() {
        let response = b"* 5 EXISTS\r\n\
                         + idling\r\n\
                         a1 OK IDLE terminated\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        let outcome = client.idle().unwrap().wait().unwrap();
        assert_eq!(outcome, WaitOutcome::MailboxChanged);
    }

    #[test]
    fn idle_rejected() {
        let response = b"a1 BAD Command IDLE not recognized\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        match client.idle() {
            Err(Error::Bad(_)) => {}
            r => panic!("unexpected result: {:?}", r.map(|_| ())),
        };
    }

    #[test]
    fn bye_during_idle() {
        let response = b"+ idling\r\n\
                         * BYE Server shutting down\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        match client.idle().unwrap().wait() {
            Err(Error::ConnectionLost) => {}
            r => panic!("unexpected result: {:?}", r),
        }
        // no DONE after the server hung up
        assert_eq!(client.stream.get_ref().written_buf, b"a1 IDLE\r\n".to_vec());
    }

    #[test]
    fn drop_sends_done() {
        let response = b"+ idling\r\n\
                         a1 OK IDLE terminated\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        drop(client.idle().unwrap());
        assert_eq!(
            client.stream.get_ref().written_buf,
            b"a1 IDLE\r\nDONE\r\n".to_vec()
        );
    }
}
