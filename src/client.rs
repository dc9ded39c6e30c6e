//! A minimal synchronous IMAP client, just enough to select a folder and `IDLE` on it.

use bufstream::BufStream;
use imap_proto::types::{Response, Status};
use log::trace;
use std::io::{self, BufRead, Read, Write};

use super::error::{Error, ParseError, Result, ValidateError};
use super::extensions::idle::Handle;
use super::parse::parse_capabilities;
use super::types::Capabilities;

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.find('\n').is_some() {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.find('\r').is_some() {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}

/// The command side of a single IMAP connection.
///
/// Only the handful of commands needed to get a folder into the selected state and keep an `IDLE`
/// running on it are provided: greeting, `STARTTLS`, `LOGIN`, `CAPABILITY`, `SELECT`, `IDLE` and
/// `LOGOUT`.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    pub(crate) stream: BufStream<T>,
    tag: u32,
    /// Log every line sent and received at `trace` level.
    pub debug: bool,
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client with the underlying stream.
    ///
    /// The server greeting is not consumed; call [`Client::read_greeting`] before issuing
    /// commands.
    pub fn new(stream: T) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            debug: false,
        }
    }

    /// Yield the underlying stream, flushing any pending writes.
    ///
    /// Used to hand a plaintext socket over to TLS after `STARTTLS`.
    pub fn into_inner(self) -> Result<T> {
        Ok(self.stream.into_inner()?)
    }

    /// Read the untagged greeting the server sends when a connection is opened.
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        match imap_proto::parser::parse_response(&v) {
            Ok((
                _,
                Response::Data {
                    status: Status::Bye,
                    ..
                },
            )) => Err(Error::ConnectionLost),
            _ => Ok(()),
        }
    }

    /// Log in to the IMAP server.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!(
            "LOGIN {} {}",
            validate_str(username)?,
            validate_str(password)?
        ))
    }

    /// Selects a mailbox, which is then the target of subsequent `IDLE` commands.
    pub fn select(&mut self, mailbox_name: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("SELECT {}", validate_str(mailbox_name)?))
    }

    /// Capability requests a listing of capabilities that the server supports.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        self.run_command_and_read_response("CAPABILITY")
            .and_then(|lines| parse_capabilities(&lines))
    }

    /// Logout informs the server that the client is done with the connection.
    pub fn logout(&mut self) -> Result<()> {
        self.run_command_and_check_ok("LOGOUT")
    }

    /// Begin an `IDLE` on the selected mailbox.
    ///
    /// The `IDLE` is terminated when the returned handle is waited on or dropped.
    pub fn idle(&mut self) -> Result<Handle<'_, T>> {
        Handle::make(self)
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        self.run_command_and_read_response(command).map(|_| ())
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        self.write_line(command.as_bytes())
    }

    /// Runs a command and returns the untagged lines the server sent before completing it.
    pub fn run_command_and_read_response(&mut self, untagged_command: &str) -> Result<Vec<u8>> {
        self.run_command(untagged_command)?;
        self.read_response()
    }

    pub(crate) fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut v = Vec::new();
        self.read_response_onto(&mut v)?;
        Ok(v)
    }

    pub(crate) fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut continue_from = None;
        let mut try_first = !data.is_empty();
        let match_tag = format!("{}{}", TAG_PREFIX, self.tag);
        loop {
            let line_start = if try_first {
                try_first = false;
                0
            } else {
                let start_new = data.len();
                self.readline(data)?;
                continue_from.take().unwrap_or(start_new)
            };

            let break_with = {
                let line = &data[line_start..];

                match imap_proto::parser::parse_response(line) {
                    Ok((
                        _,
                        Response::Done {
                            tag,
                            status,
                            information,
                            ..
                        },
                    )) => {
                        let explanation = information
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "no explanation given".to_string());
                        Some(if tag.as_bytes() != match_tag.as_bytes() {
                            Err(Error::Parse(ParseError::Invalid(line.to_vec())))
                        } else {
                            match status {
                                Status::Ok => Ok(()),
                                Status::Bad => Err(Error::Bad(explanation)),
                                Status::No => Err(Error::No(explanation)),
                                _ => Err(Error::Parse(ParseError::Invalid(line.to_vec()))),
                            }
                        })
                    }
                    Ok(..) => None,
                    Err(nom::Err::Incomplete(..)) => {
                        continue_from = Some(line_start);
                        None
                    }
                    Err(_) => Some(Err(Error::Parse(ParseError::Invalid(line.to_vec())))),
                }
            };

            match break_with {
                Some(Ok(())) => {
                    data.truncate(line_start);
                    break Ok(());
                }
                Some(Err(e)) => break Err(e),
                None => {}
            }
        }
    }

    pub(crate) fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        if self.debug {
            let line = &into[into.len() - read..];
            trace!("S: {}", String::from_utf8_lossy(line).trim_end());
        }

        Ok(read)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    pub(crate) fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        if self.debug {
            trace!("C: {}", String::from_utf8_lossy(buf));
        }
        Ok(())
    }
}

pub(crate) fn is_timeout(err: &Error) -> bool {
    match *err {
        Error::Io(ref e) => {
            e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock
        }
        _ => false,
    }
}
