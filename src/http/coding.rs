//! Content coding pipeline
//!
//! gzip and deflate bodies pass through a compressor on the sending side
//! and a decompressor on the receiving side, wrapped around the fixed
//! length or chunked framing. "deflate" is the zlib format.

use super::connection::Connection;
use super::{Error, Result, Role, State, MAX_SBUFFER};
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

/// Content coding of the body in flight
///
/// The compression context lives inside the variant, so an active coding
/// always has one and the identity coding never does.
#[derive(Default)]
pub enum ContentCoding {
    #[default]
    Identity,
    /// Compress outgoing bytes with zlib
    Deflate(ZlibEncoder<Vec<u8>>),
    /// Compress outgoing bytes with gzip
    Gzip(GzEncoder<Vec<u8>>),
    /// Decompress incoming zlib bytes
    Inflate(ZlibDecoder<Vec<u8>>),
    /// Decompress incoming gzip bytes
    Gunzip(GzDecoder<Vec<u8>>),
}

impl ContentCoding {
    /// Coding for a `Content-Encoding` value, or `None` for identity and
    /// unsupported codings
    pub fn for_encoding(value: &str, compress: bool) -> Option<ContentCoding> {
        let value = value.trim();
        let gzip = value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip");
        let deflate =
            value.eq_ignore_ascii_case("deflate") || value.eq_ignore_ascii_case("x-deflate");

        let out = Vec::with_capacity(MAX_SBUFFER);
        match (gzip, deflate, compress) {
            (true, _, true) => Some(ContentCoding::Gzip(GzEncoder::new(out, Compression::default()))),
            (true, _, false) => Some(ContentCoding::Gunzip(GzDecoder::new(out))),
            (_, true, true) => Some(ContentCoding::Deflate(ZlibEncoder::new(
                out,
                Compression::default(),
            ))),
            (_, true, false) => Some(ContentCoding::Inflate(ZlibDecoder::new(out))),
            _ => None,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, ContentCoding::Identity)
    }

    pub fn is_compressing(&self) -> bool {
        matches!(self, ContentCoding::Deflate(_) | ContentCoding::Gzip(_))
    }

    pub fn is_decompressing(&self) -> bool {
        matches!(self, ContentCoding::Inflate(_) | ContentCoding::Gunzip(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContentCoding::Identity => "identity",
            ContentCoding::Deflate(_) => "deflate",
            ContentCoding::Gzip(_) => "gzip",
            ContentCoding::Inflate(_) => "inflate",
            ContentCoding::Gunzip(_) => "gunzip",
        }
    }

    /// Feed bytes through the coder
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        let result = match self {
            ContentCoding::Identity => return Ok(()),
            ContentCoding::Deflate(c) => c.write_all(data),
            ContentCoding::Gzip(c) => c.write_all(data),
            ContentCoding::Inflate(d) => d.write_all(data).and_then(|_| d.flush()),
            ContentCoding::Gunzip(d) => d.write_all(data).and_then(|_| d.flush()),
        };
        result.map_err(|e| Error::Compression(e.to_string()))
    }

    fn output(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            ContentCoding::Identity => None,
            ContentCoding::Deflate(c) => Some(c.get_mut()),
            ContentCoding::Gzip(c) => Some(c.get_mut()),
            ContentCoding::Inflate(d) => Some(d.get_mut()),
            ContentCoding::Gunzip(d) => Some(d.get_mut()),
        }
    }

    /// Whether coded output is waiting to be taken
    pub fn has_output(&self) -> bool {
        match self {
            ContentCoding::Identity => false,
            ContentCoding::Deflate(c) => !c.get_ref().is_empty(),
            ContentCoding::Gzip(c) => !c.get_ref().is_empty(),
            ContentCoding::Inflate(d) => !d.get_ref().is_empty(),
            ContentCoding::Gunzip(d) => !d.get_ref().is_empty(),
        }
    }

    /// Take one full `MAX_SBUFFER` slice of output, if there is one
    pub fn take_slice(&mut self) -> Option<Vec<u8>> {
        let out = self.output()?;
        if out.len() < MAX_SBUFFER {
            return None;
        }
        Some(out.drain(..MAX_SBUFFER).collect())
    }

    /// Move up to `buf.len()` bytes of output into `buf`
    pub fn read_output(&mut self, buf: &mut [u8]) -> usize {
        let Some(out) = self.output() else {
            return 0;
        };
        let n = buf.len().min(out.len());
        buf[..n].copy_from_slice(&out[..n]);
        out.drain(..n);
        n
    }

    /// Flush the coder's trailing bytes into its output, keeping the context
    pub fn try_finish(&mut self) -> Result<()> {
        let result = match self {
            ContentCoding::Identity => return Ok(()),
            ContentCoding::Deflate(c) => c.try_finish(),
            ContentCoding::Gzip(c) => c.try_finish(),
            ContentCoding::Inflate(d) => d.try_finish(),
            ContentCoding::Gunzip(d) => d.try_finish(),
        };
        result.map_err(|e| Error::Compression(e.to_string()))
    }

    /// Flush the coder's trailing bytes and release the context
    ///
    /// Returns whatever output has not been taken yet.
    pub fn finish(self) -> Result<Vec<u8>> {
        let result = match self {
            ContentCoding::Identity => return Ok(Vec::new()),
            ContentCoding::Deflate(c) => c.finish(),
            ContentCoding::Gzip(c) => c.finish(),
            ContentCoding::Inflate(d) => d.finish(),
            ContentCoding::Gunzip(d) => d.finish(),
        };
        result.map_err(|e| Error::Compression(e.to_string()))
    }
}

impl std::fmt::Debug for ContentCoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Connection {
    /// Current content coding
    pub fn content_coding(&self) -> &ContentCoding {
        &self.coding
    }

    /// Start coding the body about to flow, per `Content-Encoding`
    ///
    /// The sending side of a body compresses and the receiving side
    /// decompresses: servers send GET/POST responses and receive POST/PUT
    /// request bodies, clients the other way round. Bytes already in the
    /// write buffer go out uncompressed before the coder takes over.
    pub(crate) fn start_content_coding(&mut self, value: &str) -> Result<()> {
        if !self.coding.is_identity() || value.is_empty() {
            return Ok(());
        }

        let compress = match (self.role, self.state) {
            (Role::Server, State::GetSend | State::PostSend) => true,
            (Role::Client, State::PostRecv | State::PutRecv) => true,
            (Role::Client, State::GetSend | State::PostSend) => false,
            (Role::Server, State::PostRecv | State::PutRecv) => false,
            _ => return Ok(()),
        };

        let Some(coding) = ContentCoding::for_encoding(value, compress) else {
            return Ok(());
        };

        if compress {
            self.flush_write().map_err(|e| self.abort_exchange(e))?;
        }

        log::debug!("{}: starting {} content coding", self.hostname, coding.name());
        self.coding = coding;
        Ok(())
    }

    /// Finish the active coding
    ///
    /// A compressor's trailing bytes go out through the body framing.
    pub(crate) fn finish_content_coding(&mut self) -> Result<()> {
        let coding = std::mem::take(&mut self.coding);
        if !coding.is_compressing() {
            return Ok(());
        }

        let tail = match coding.finish() {
            Ok(tail) => tail,
            Err(e) => return Err(self.fail(e)),
        };

        self.flush_write()?;
        for slice in tail.chunks(MAX_SBUFFER) {
            self.write_framed(slice)?;
        }
        Ok(())
    }

    /// Compress `data` and send every full output slice
    pub(crate) fn write_coded(&mut self, data: &[u8]) -> Result<()> {
        if let Err(e) = self.coding.push(data) {
            self.coding = ContentCoding::Identity;
            return Err(self.fail(e));
        }

        while let Some(slice) = self.coding.take_slice() {
            self.write_framed(&slice)?;
        }
        Ok(())
    }

    /// Read and decompress body bytes
    ///
    /// Returns 0 once the framing is exhausted and the decompressor has
    /// nothing left to give; the context is released at that point.
    pub(crate) fn read_coded(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut staging = [0u8; 4096];

        loop {
            let n = self.coding.read_output(buf);
            if n > 0 {
                return Ok(n);
            }

            let read = self.read_framed(&mut staging)?;
            if read == 0 {
                if let Err(e) = self.coding.try_finish() {
                    self.coding = ContentCoding::Identity;
                    return Err(self.fail_exchange(e));
                }

                let n = self.coding.read_output(buf);
                if !self.coding.has_output() {
                    self.coding = ContentCoding::Identity;
                }
                return Ok(n);
            }

            if let Err(e) = self.coding.push(&staging[..read]) {
                self.coding = ContentCoding::Identity;
                return Err(self.fail_exchange(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(encoding: &str, data: &[u8]) -> Vec<u8> {
        let mut compressor = ContentCoding::for_encoding(encoding, true).unwrap();
        assert!(compressor.is_compressing());

        let mut wire = Vec::new();
        for piece in data.chunks(1000) {
            compressor.push(piece).unwrap();
            while let Some(slice) = compressor.take_slice() {
                assert_eq!(slice.len(), MAX_SBUFFER);
                wire.extend_from_slice(&slice);
            }
        }
        wire.extend_from_slice(&compressor.finish().unwrap());

        let mut decompressor = ContentCoding::for_encoding(encoding, false).unwrap();
        assert!(decompressor.is_decompressing());

        let mut plain = Vec::new();
        let mut buf = [0u8; 333];
        for piece in wire.chunks(77) {
            decompressor.push(piece).unwrap();
            loop {
                let n = decompressor.read_output(&mut buf);
                if n == 0 {
                    break;
                }
                plain.extend_from_slice(&buf[..n]);
            }
        }
        plain.extend_from_slice(&decompressor.finish().unwrap());
        plain
    }

    #[test]
    fn test_coding_names() {
        assert!(ContentCoding::for_encoding("identity", true).is_none());
        assert!(ContentCoding::for_encoding("br", false).is_none());
        assert_eq!(
            ContentCoding::for_encoding("X-GZIP", true).unwrap().name(),
            "gzip"
        );
        assert_eq!(
            ContentCoding::for_encoding("x-deflate", false).unwrap().name(),
            "inflate"
        );
        assert!(ContentCoding::default().is_identity());
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip("gzip", &data), data);
    }

    #[test]
    fn test_deflate_roundtrip() {
        let data = b"%!PS-Adobe-3.0\n".repeat(5000);
        assert_eq!(roundtrip("deflate", &data), data);
    }

    #[test]
    fn test_corrupt_input_is_compression_error() {
        let mut decompressor = ContentCoding::for_encoding("gzip", false).unwrap();
        let result = decompressor
            .push(b"this is not gzip data at all")
            .and_then(|_| decompressor.finish().map(|_| ()));
        assert!(matches!(result, Err(Error::Compression(_))));
    }
}
