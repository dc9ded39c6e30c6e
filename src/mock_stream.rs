use crate::extensions::idle::SetReadTimeout;
use std::cmp::min;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockStream {
    read_buf: Vec<u8>,
    read_pos: usize,
    pub written_buf: Vec<u8>,
    pub read_timeouts: Vec<Option<Duration>>,
    err_on_read: bool,
    eof_on_read: bool,
    timeout_on_exhaust: bool,
    reply_after_timeout: Option<Vec<u8>>,
    read_delay: usize,
}

impl MockStream {
    pub fn new(read_buf: Vec<u8>) -> MockStream {
        MockStream::default().with_buf(read_buf)
    }

    pub fn with_buf(mut self, read_buf: Vec<u8>) -> MockStream {
        self.read_buf = read_buf;
        self
    }

    pub fn with_eof(mut self) -> MockStream {
        self.eof_on_read = true;
        self
    }

    pub fn with_err(mut self) -> MockStream {
        self.err_on_read = true;
        self
    }

    pub fn with_delay(mut self) -> MockStream {
        self.read_delay = 1;
        self
    }

    /// Report `WouldBlock` instead of EOF once all scripted data has been read.
    pub fn with_timeout_on_exhaust(mut self) -> MockStream {
        self.timeout_on_exhaust = true;
        self
    }

    /// Data that becomes readable after the first simulated timeout.
    pub fn with_reply_after_timeout(mut self, reply: Vec<u8>) -> MockStream {
        self.reply_after_timeout = Some(reply);
        self
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof_on_read {
            return Ok(0);
        }
        if self.err_on_read {
            return Err(Error::new(ErrorKind::Other, "MockStream Error"));
        }
        if self.read_pos >= self.read_buf.len() {
            if self.timeout_on_exhaust {
                if let Some(reply) = self.reply_after_timeout.take() {
                    self.read_buf.extend_from_slice(&reply);
                }
                return Err(Error::new(ErrorKind::WouldBlock, "MockStream timeout"));
            }
            return Err(Error::new(ErrorKind::UnexpectedEof, "EOF"));
        }
        let mut write_len = min(buf.len(), self.read_buf.len() - self.read_pos);
        if self.read_delay > 0 {
            self.read_delay -= 1;
            write_len = min(write_len, 1);
        }
        let max_pos = self.read_pos + write_len;
        buf[..write_len].copy_from_slice(&self.read_buf[self.read_pos..max_pos]);
        self.read_pos += write_len;
        Ok(write_len)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.written_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SetReadTimeout for MockStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> crate::Result<()> {
        self.read_timeouts.push(timeout);
        Ok(())
    }
}
