use log::{debug, trace};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[cfg(feature = "native-tls")]
use native_tls::TlsConnector;

use crate::client::Client;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::extensions::idle::{SetReadTimeout, WaitOutcome};
use crate::store::{FolderIdler, IdleResult, MailStore};

/// How long to keep a single `IDLE` running before re-issuing it, as advised by
/// [RFC 2177](https://tools.ietf.org/html/rfc2177#section-3).
pub const DEFAULT_IDLE_REFRESH_TIMEOUT: Duration = Duration::from_secs(29 * 60);

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// How the connection to the server is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte, usually on port 993.
    Tls,
    /// Plaintext upgraded with `STARTTLS`, usually on port 143.
    StartTls,
    /// No encryption at all. Only sensible for local servers and tests.
    Plaintext,
}

/// A convenience builder for [`ImapStore`]s.
///
/// ```no_run
/// # use imap_push::ImapStoreBuilder;
/// let store = ImapStoreBuilder::new("imap.example.com", 993)
///     .credentials("user@example.com", "hunter2")
///     .build();
/// ```
///
/// To use `STARTTLS`, just call `starttls()` before building:
/// ```no_run
/// # use imap_push::ImapStoreBuilder;
/// let store = ImapStoreBuilder::new("imap.example.com", 143)
///     .starttls()
///     .credentials("user@example.com", "hunter2")
///     .build();
/// ```
#[derive(Clone)]
pub struct ImapStoreBuilder {
    domain: String,
    port: u16,
    security: Security,
    credentials: Option<(String, String)>,
    connect_timeout: Option<Duration>,
    debug: bool,
}

impl ImapStoreBuilder {
    /// Make a new `ImapStoreBuilder` using the given domain and port, with implicit TLS.
    pub fn new(domain: impl Into<String>, port: u16) -> Self {
        ImapStoreBuilder {
            domain: domain.into(),
            port,
            security: Security::Tls,
            credentials: None,
            connect_timeout: None,
            debug: false,
        }
    }

    /// Use `STARTTLS` for this connection.
    pub fn starttls(&mut self) -> &mut Self {
        self.security = Security::StartTls;
        self
    }

    /// Do not encrypt the connection.
    pub fn plaintext(&mut self) -> &mut Self {
        self.security = Security::Plaintext;
        self
    }

    /// Log in with `LOGIN`. Without credentials the server must pre-authenticate the connection.
    pub fn credentials(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Give up on connecting to each resolved address after `timeout`.
    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Log the protocol exchange at `trace` level.
    pub fn debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// Finish building.
    pub fn build(&self) -> ImapStore {
        ImapStore {
            domain: self.domain.clone(),
            port: self.port,
            security: self.security,
            credentials: self.credentials.clone(),
            connect_timeout: self.connect_timeout,
            debug: self.debug,
        }
    }
}

/// A [`MailStore`] that opens one IMAP connection per watched folder.
///
/// Each [`create_folder_idler`](MailStore::create_folder_idler) call connects, logs in, checks for
/// the `IDLE` capability and selects the folder; the connection then belongs to the returned
/// idler and is logged out when the idler is dropped.
#[derive(Clone)]
pub struct ImapStore {
    domain: String,
    port: u16,
    security: Security,
    credentials: Option<(String, String)>,
    connect_timeout: Option<Duration>,
    debug: bool,
}

impl ImapStore {
    /// Open an authenticated connection.
    ///
    /// Also returns a second handle to the TCP socket underneath any TLS layer, which can be shut
    /// down from another thread to abort blocking reads.
    pub fn connect(&self) -> Result<(Client<Connection>, TcpStream)> {
        let tcp = self.open_tcp()?;
        let canceller = tcp.try_clone()?;

        let mut client = match self.security {
            Security::Plaintext => {
                let mut client = Client::new(Box::new(tcp) as Connection);
                client.debug = self.debug;
                client.read_greeting()?;
                client
            }
            Security::Tls => {
                let mut client = Client::new(tls_handshake(&self.domain, tcp)?);
                client.debug = self.debug;
                client.read_greeting()?;
                client
            }
            Security::StartTls => {
                let mut client = Client::new(tcp);
                client.debug = self.debug;
                client.read_greeting()?;
                client.run_command_and_check_ok("STARTTLS")?;
                let mut client = Client::new(tls_handshake(&self.domain, client.into_inner()?)?);
                client.debug = self.debug;
                client
            }
        };

        if let Some((ref username, ref password)) = self.credentials {
            client.login(username, password)?;
        }

        Ok((client, canceller))
    }

    fn open_tcp(&self) -> Result<TcpStream> {
        let timeout = match self.connect_timeout {
            Some(timeout) => timeout,
            None => return Ok(TcpStream::connect((self.domain.as_str(), self.port))?),
        };

        let mut last_err = None;
        for addr in (self.domain.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => {
                    debug!("couldn't connect to {}: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.map(Error::Io).unwrap_or(Error::ConnectionLost))
    }
}

#[cfg(feature = "native-tls")]
fn tls_handshake(domain: &str, tcp: TcpStream) -> Result<Connection> {
    let ssl_conn = TlsConnector::builder().build()?;
    Ok(Box::new(TlsConnector::connect(&ssl_conn, domain, tcp)?))
}

#[cfg(not(feature = "native-tls"))]
fn tls_handshake(_domain: &str, _tcp: TcpStream) -> Result<Connection> {
    Err(Error::TlsNotConfigured)
}

impl MailStore for ImapStore {
    fn create_folder_idler(
        &self,
        folder_server_id: &str,
        idle_refresh_timeout: Duration,
    ) -> Result<Box<dyn FolderIdler>> {
        let (mut client, canceller) = self.connect()?;

        let capabilities = client.capabilities()?;
        if !capabilities.has_str("IDLE") {
            let _ = client.logout();
            return Err(Error::IdleNotSupported);
        }

        client.select(folder_server_id)?;

        Ok(Box::new(ImapFolderIdler::new(
            client,
            Some(canceller),
            folder_server_id,
            idle_refresh_timeout,
        )))
    }
}

impl std::fmt::Debug for ImapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapStore")
            .field("domain", &self.domain)
            .field("port", &self.port)
            .field("security", &self.security)
            .field(
                "username",
                &self.credentials.as_ref().map(|(username, _)| username),
            )
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl std::fmt::Debug for ImapStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.build().fmt(f)
    }
}

/// Keeps an `IDLE` running on a selected folder, one refresh period at a time.
///
/// Every call to [`idle`](FolderIdler::idle) issues a fresh `IDLE` and waits up to the refresh
/// timeout for the server to report a change. [`stop`](FolderIdler::stop) shuts the socket down,
/// which is the only way to interrupt a read blocked inside TLS from another thread.
pub struct ImapFolderIdler<T: Read + Write> {
    client: Mutex<Client<T>>,
    canceller: Option<TcpStream>,
    folder_server_id: String,
    idle_refresh_timeout: Duration,
    stopped: AtomicBool,
}

impl<T: Read + Write + SetReadTimeout + Send> ImapFolderIdler<T> {
    /// Wrap a client that has already selected `folder_server_id`.
    ///
    /// `canceller` is shut down by `stop`; without one, `stop` only takes effect once the current
    /// idle cycle ends.
    pub fn new(
        client: Client<T>,
        canceller: Option<TcpStream>,
        folder_server_id: &str,
        idle_refresh_timeout: Duration,
    ) -> Self {
        ImapFolderIdler {
            client: Mutex::new(client),
            canceller,
            folder_server_id: folder_server_id.to_string(),
            idle_refresh_timeout,
            stopped: AtomicBool::new(false),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl<T: Read + Write + SetReadTimeout + Send> FolderIdler for ImapFolderIdler<T> {
    fn idle(&self) -> Result<IdleResult> {
        if self.is_stopped() {
            return Ok(IdleResult::Stopped);
        }

        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = client
            .idle()
            .and_then(|handle| handle.wait_timeout(self.idle_refresh_timeout));

        match outcome {
            Ok(WaitOutcome::MailboxChanged) => Ok(IdleResult::Sync),
            Ok(WaitOutcome::TimedOut) => {
                trace!("Refreshing IDLE for {}", self.folder_server_id);
                Ok(IdleResult::NoChange)
            }
            Err(_) if self.is_stopped() => Ok(IdleResult::Stopped),
            Err(e) => Err(e),
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        trace!("Stopping IDLE for {}", self.folder_server_id);
        if let Some(ref socket) = self.canceller {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl<T: Read + Write> Drop for ImapFolderIdler<T> {
    fn drop(&mut self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        // be nice to the server, but don't hang on it
        if let Some(ref socket) = self.canceller {
            let _ = socket.set_read_timeout(Some(LOGOUT_TIMEOUT));
        }
        let client = self.client.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = client.logout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::MockStream;

    fn idler(response: &[u8]) -> ImapFolderIdler<MockStream> {
        let client = Client::new(MockStream::new(response.to_vec()).with_timeout_on_exhaust());
        ImapFolderIdler::new(client, None, "INBOX", Duration::from_secs(60))
    }

    #[test]
    fn change_is_sync() {
        let idler = idler(
            b"+ idling\r\n\
              * 12 EXISTS\r\n\
              a1 OK IDLE terminated\r\n",
        );
        assert_eq!(idler.idle().unwrap(), IdleResult::Sync);
        idler.stop();
    }

    #[test]
    fn consecutive_cycles_reissue_idle() {
        let idler = idler(
            b"+ idling\r\n\
              * 12 EXISTS\r\n\
              a1 OK IDLE terminated\r\n\
              + idling\r\n\
              * 3 EXPUNGE\r\n\
              a2 OK IDLE terminated\r\n",
        );
        assert_eq!(idler.idle().unwrap(), IdleResult::Sync);
        assert_eq!(idler.idle().unwrap(), IdleResult::Sync);
        idler.stop();
        let client = idler.client.lock().unwrap();
        assert_eq!(
            client.stream.get_ref().written_buf,
            b"a1 IDLE\r\nDONE\r\na2 IDLE\r\nDONE\r\n".to_vec()
        );
    }

    #[test]
    fn change_after_refresh_timeout_is_sync() {
        let client = Client::new(
            MockStream::new(b"+ idling\r\n".to_vec())
                .with_timeout_on_exhaust()
                .with_reply_after_timeout(b"* 7 EXISTS\r\na1 OK IDLE terminated\r\n".to_vec()),
        );
        let idler = ImapFolderIdler::new(client, None, "INBOX", Duration::from_secs(60));
        assert_eq!(idler.idle().unwrap(), IdleResult::Sync);
        idler.stop();
    }

    #[test]
    fn lost_connection_is_an_error() {
        let idler = idler(
            b"+ idling\r\n\
              * BYE shutting down\r\n",
        );
        match idler.idle() {
            Err(Error::ConnectionLost) => {}
            r => panic!("unexpected result: {:?}", r),
        }
        idler.stop();
    }

    #[test]
    fn stopped_idler_does_not_idle() {
        let idler = idler(b"");
        idler.stop();
        idler.stop();
        assert_eq!(idler.idle().unwrap(), IdleResult::Stopped);
        let client = idler.client.lock().unwrap();
        assert!(client.stream.get_ref().written_buf.is_empty());
    }

    #[test]
    fn builder_defaults_to_tls() {
        let store = ImapStoreBuilder::new("imap.example.com", 993)
            .credentials("user", "secret")
            .build();
        assert_eq!(store.security, Security::Tls);
        assert!(!format!("{:?}", store).contains("secret"));
    }

    #[test]
    fn builder_starttls() {
        let store = ImapStoreBuilder::new("imap.example.com", 143)
            .starttls()
            .connect_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(store.security, Security::StartTls);
        assert_eq!(store.connect_timeout, Some(Duration::from_secs(3)));
        assert!(store.credentials.is_none());
    }
}
