//! Message body transfer
//!
//! `read` and `write` move body bytes for the exchange in flight through
//! the content coding and the framing set up by the header section, and
//! advance the connection state once the last byte has passed.

use super::chunked::DataEncoding;
use super::connection::Connection;
use super::{Error, Result, Role, State};

impl Connection {
    /// Read body bytes without content decoding
    ///
    /// Returns 0 once the framing reports the end of the body.
    pub(crate) fn read_framed(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.data_encoding {
            DataEncoding::Fields => Ok(0),
            DataEncoding::Chunked => {
                let n = self.read_chunk(buf)?;
                if n == 0 {
                    self.data_encoding = DataEncoding::Fields;
                }
                Ok(n)
            }
            DataEncoding::Length => {
                if self.remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }

                let len = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
                let n = self.read_buffered(&mut buf[..len])?;
                if n == 0 {
                    if self.until_close {
                        self.remaining = 0;
                        return Ok(0);
                    }
                    return Err(self.fail_exchange(Error::ConnectionClosed));
                }

                self.remaining -= n as u64;
                Ok(n)
            }
        }
    }

    /// Whether this side is on the receiving end of the body in flight
    fn receiving_body(&self) -> bool {
        match self.role {
            Role::Client => self.state.is_response_body() || self.state == State::Head,
            Role::Server => self.state.is_request_body(),
        }
    }

    /// Mark the received body as complete
    pub(crate) fn end_body(&mut self) {
        self.data_encoding = DataEncoding::Fields;
        self.remaining = 0;
        self.until_close = false;
        self.state = self.state.on_body_complete();
        log::trace!("{}: body complete, state {}", self.hostname, self.state);
    }

    /// Read body bytes
    ///
    /// Returns the number of bytes placed in `buf`, or 0 at the end of the
    /// body. Decoded bytes are returned when a content coding is active.
    /// Reaching the end moves the connection to its next state.
    /// Any failure other than would-block puts the exchange into the
    /// error state.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.read_body(buf).map_err(|e| self.abort_exchange(e))
    }

    fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.wbuf.is_empty() {
            self.flush_write()?;
        }

        let coded = self.coding.is_decompressing();
        let n = if coded {
            self.read_coded(buf)?
        } else {
            self.read_framed(buf)?
        };

        let done = if coded {
            n == 0
        } else {
            n == 0 || (self.data_encoding == DataEncoding::Length && self.remaining == 0)
        };

        if done && self.receiving_body() {
            self.end_body();
        }

        Ok(n)
    }

    /// Read the rest of the body into a vector
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Write body bytes
    ///
    /// With chunked framing an empty write ends the body. With a fixed
    /// length the body ends once `Content-Length` bytes have been written.
    /// Failures put the exchange into the error state, as for `read`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.transport.is_none() {
            return Err(self.fail(Error::NotConnected));
        }

        self.write_body(data).map_err(|e| self.abort_exchange(e))
    }

    fn write_body(&mut self, data: &[u8]) -> Result<usize> {
        if self.coding.is_compressing() {
            if !data.is_empty() {
                self.write_coded(data)?;
            }
        } else if !data.is_empty() {
            self.buffer_write(data)?;
        }

        if self.data_encoding == DataEncoding::Length {
            self.remaining = self.remaining.saturating_sub(data.len() as u64);
        }

        let finished = (self.data_encoding == DataEncoding::Chunked && data.is_empty())
            || (self.data_encoding == DataEncoding::Length && self.remaining == 0);

        if finished {
            self.finish_body()?;
        }

        Ok(data.len())
    }

    /// Send everything left of the outgoing body and end it
    fn finish_body(&mut self) -> Result<()> {
        self.finish_content_coding()?;
        self.flush_write()?;

        if self.data_encoding == DataEncoding::Chunked {
            self.write_last_chunk()?;
            self.data_encoding = DataEncoding::Fields;
            self.remaining = 0;
        }

        self.state = match self.state {
            State::PostRecv => State::PostSend,
            State::PostSend | State::GetSend => State::Waiting,
            _ => State::Status,
        };

        log::trace!("{}: body sent, state {}", self.hostname, self.state);
        Ok(())
    }

    /// Read and discard the rest of the incoming body
    ///
    /// When the body cannot be drained the connection is closed, since the
    /// next exchange could not find its start.
    pub fn flush_body(&mut self) -> Result<()> {
        let state = self.state;
        let mut buf = [0u8; 8192];

        let result = loop {
            match self.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        let stuck = self.state == state && self.state != State::Waiting;
        if (result.is_err() || stuck) && self.is_connected() {
            log::debug!("{}: closing connection with unread body", self.hostname);
            self.disconnect();
        }

        result
    }
}
