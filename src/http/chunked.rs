//! Transfer length and chunked transfer encoding
//!
//! This module decides how a message body is delimited once its header
//! section is known (fixed length, chunked, or until the connection
//! closes) and implements the chunk framing on top of the connection's
//! buffered I/O.

use super::connection::Connection;
use super::field::{Field, FieldTable};
use super::{Error, Result, Role, State, Status, CRLF, UNTIL_CLOSE};
use std::io::Write;

/// How the body of the current message is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataEncoding {
    /// Fixed length from `Content-Length` (or until close)
    Length,
    /// Chunked transfer encoding
    Chunked,
    /// A header section is being sent or received; no body framing
    #[default]
    Fields,
}

/// Whether the field table asks for chunked framing
pub fn is_chunked(fields: &FieldTable) -> bool {
    fields
        .get(Field::TransferEncoding)
        .eq_ignore_ascii_case("chunked")
}

/// Body length implied by a header section
///
/// Chunked messages report 0 ("read the next chunk header"). Without a
/// `Content-Length`, messages that cannot carry a body report 0 and all
/// others `UNTIL_CLOSE`.
pub fn transfer_length(fields: &FieldTable, role: Role, state: State, status: Status) -> Result<u64> {
    if is_chunked(fields) {
        return Ok(0);
    }

    let value = fields.get(Field::ContentLength).trim();
    if value.is_empty() {
        let no_body = status.code() >= Status::MULTIPLE_CHOICES.code()
            || state == State::Options
            || (state == State::Get && role == Role::Server)
            || state == State::Head
            || (state == State::Put && role == Role::Client)
            || state == State::Delete
            || state == State::Trace
            || state == State::Connect;

        return Ok(if no_body { 0 } else { UNTIL_CLOSE });
    }

    match value.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n as u64),
        _ => Err(Error::InvalidContentLength(value.to_string())),
    }
}

/// Parse a chunk-size line; chunk extensions are ignored
pub fn parse_chunk_size(line: &str) -> Result<u64> {
    let size_str = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_str, 16).map_err(|_| Error::InvalidChunkSize(size_str.to_string()))
}

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    ///
    /// Empty input writes nothing; the terminating chunk comes from `finish`.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final chunk (0-sized chunk)
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Encode data as a complete chunked body
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut encoder = ChunkedEncoder::new(Vec::with_capacity(data.len() + 16));

    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }

    encoder.finish()?;
    Ok(encoder.into_inner())
}

impl Connection {
    /// Body length implied by the current header section
    ///
    /// Returns `UNTIL_CLOSE` when the body runs until the peer closes.
    pub fn get_length(&self) -> Result<u64> {
        transfer_length(&self.fields, self.role, self.state, self.status)
    }

    /// Current body framing
    pub fn data_encoding(&self) -> DataEncoding {
        self.data_encoding
    }

    /// Body bytes left in the current message or chunk
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Set up body framing from the header section
    ///
    /// Servers only frame bodies for requests that carry one and for the
    /// responses they send.
    pub(crate) fn set_length(&mut self) -> Result<()> {
        let remaining = match self.get_length() {
            Ok(n) => n,
            Err(e) => return Err(self.fail_exchange(e)),
        };

        if self.role == Role::Server
            && !matches!(
                self.state,
                State::GetSend | State::Put | State::Post | State::PostSend
            )
        {
            return Ok(());
        }

        if is_chunked(&self.fields) {
            self.data_encoding = DataEncoding::Chunked;
            self.remaining = 0;
            self.until_close = false;
        } else {
            self.data_encoding = DataEncoding::Length;
            self.remaining = remaining;
            self.until_close = remaining == UNTIL_CLOSE;
        }

        log::trace!(
            "{}: body framing {:?}, remaining {}",
            self.hostname,
            self.data_encoding,
            self.remaining
        );
        Ok(())
    }

    /// Read from the current chunk, starting a new one when needed
    ///
    /// Returns 0 once the terminating chunk and its trailer have been read.
    pub(crate) fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            let mut line = self.read_line()?;
            if line.trim().is_empty() {
                // CRLF left over from the previous chunk
                line = self.read_line()?;
            }

            self.remaining = match parse_chunk_size(&line) {
                Ok(n) => n,
                Err(e) => return Err(self.fail_exchange(e)),
            };

            if self.remaining == 0 {
                // Trailer section ends with a blank line
                while !self.read_line()?.is_empty() {}
                return Ok(0);
            }
        }

        let len = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.read_buffered(&mut buf[..len])?;
        if n == 0 {
            return Err(self.fail_exchange(Error::ConnectionClosed));
        }

        self.remaining -= n as u64;
        if self.remaining == 0 {
            let line = self.read_line()?;
            if !line.is_empty() {
                return Err(self.fail_exchange(Error::Protocol(
                    "Expected CRLF after chunk".to_string(),
                )));
            }
        }

        Ok(n)
    }

    /// Write one chunk: hex length, payload, CRLF
    pub(crate) fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut encoder = ChunkedEncoder::new(Vec::with_capacity(data.len() + 12));
        encoder.write_chunk(data)?;
        self.write_some(&encoder.into_inner()).map(|_| ())
    }

    /// Write the terminating zero-length chunk and blank line
    pub(crate) fn write_last_chunk(&mut self) -> Result<()> {
        let mut encoder = ChunkedEncoder::new(Vec::with_capacity(5));
        encoder.finish()?;
        self.write_some(&encoder.into_inner()).map(|_| ())
    }
}
