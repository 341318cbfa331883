//! HTTP/1.1 transport engine
//!
//! This module provides the connection object used by both sides of an
//! IPP exchange. A `Connection` carries one request/response exchange at a
//! time over a single socket and moves through the states in `State`.
//!
//! # Architecture
//!
//! The connection is built from cooperating pieces, each in its own module:
//!
//! - `session`: the `SessionOps` abstraction over plain and TLS sockets,
//!   with poll-based deadlines
//! - `field`: the per-exchange header field table
//! - `chunked`: transfer-length determination and chunk framing
//! - `coding`: gzip/deflate content coding wrapped around the framing
//! - `upgrade`: in-band upgrade to TLS and peer identity validation
//! - `client` / `server`: the request and response halves of the state
//!   machine
//!
//! # Examples
//!
//! ```no_run
//! use ipphttp::http::{Connection, ConnectionConfig, Field, Method, Status};
//!
//! let config = ConnectionConfig::builder().build();
//! let mut conn = Connection::open("localhost", 631, config).unwrap();
//!
//! conn.set_field(Field::ContentType, "application/ipp").unwrap();
//! conn.set_field(Field::ContentLength, "5").unwrap();
//! conn.send_request(Method::Post, "/ipp/print").unwrap();
//! conn.write(b"hello").unwrap();
//!
//! let status = conn.read_response_status().unwrap();
//! assert_eq!(status, Status::OK);
//! ```

pub mod auth;
pub mod chunked;
pub mod client;
pub mod coding;
pub mod connection;
pub mod field;
pub mod message;
pub mod parser;
pub mod server;
pub mod session;
pub mod tls;
pub mod transfer;
pub mod upgrade;

pub use auth::AuthString;
pub use chunked::DataEncoding;
pub use coding::ContentCoding;
pub use connection::{Connection, ConnectionConfig, ConnectionConfigBuilder};
pub use field::{Field, FieldTable};
pub use message::{Encryption, Method, Role, State, Status, Version};
pub use session::{FdSessionOps, PollEvents, SessionOps, TimeoutCallback};

use std::io;
use std::sync::Once;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Line too long")]
    LineTooLong,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Operation canceled")]
    Canceled,

    #[error("Encryption is not supported by the peer")]
    EncryptionNotSupported,

    #[error("Peer credentials changed for {0}")]
    PeerIdentityChanged(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// The I/O error class this error reports through `Connection::error`
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::Network(crate::net::Error::Io(e)) => e.kind(),
            Error::Network(crate::net::Error::Connect { source, .. }) => source.kind(),
            Error::Network(crate::net::Error::Timeout) | Error::Timeout => io::ErrorKind::TimedOut,
            Error::Network(crate::net::Error::Canceled) | Error::Canceled => io::ErrorKind::Interrupted,
            Error::Network(_) => io::ErrorKind::AddrNotAvailable,
            Error::ConnectionClosed => io::ErrorKind::BrokenPipe,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::Tls(_)
            | Error::EncryptionNotSupported
            | Error::PeerIdentityChanged(_) => io::ErrorKind::PermissionDenied,
            Error::Compression(_) => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        }
    }

    /// Whether the error came from a would-block condition on a non-blocking socket
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

/// Maximum size of the read-ahead and write buffers
pub const MAX_BUFFER: usize = 32768;

/// Maximum size of one compressed slice handed to the framing layer
pub const MAX_SBUFFER: usize = 65536;

/// Default maximum length of a header or chunk-size line
pub const MAX_LINE: usize = 32768;

/// Remaining length reported for bodies delimited by connection close
pub const UNTIL_CLOSE: u64 = 2_147_483_647;

/// Default HTTP port for IPP
pub const DEFAULT_IPP_PORT: u16 = 631;

/// Well-known port that implies always-on encryption
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Protocols offered in an `Upgrade` field
pub const UPGRADE_PROTOCOLS: &str = "TLS/1.2,TLS/1.1,TLS/1.0";

/// CRLF line ending
pub const CRLF: &str = "\r\n";

static INIT: Once = Once::new();

/// One-time process setup
///
/// Ignores `SIGPIPE` so that writes to a closed peer surface as
/// `BrokenPipe` errors, and initializes the TLS library. Safe to call any
/// number of times from any thread.
pub fn init() {
    INIT.call_once(|| {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        openssl::init();
        log::debug!("transport initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Timeout.kind(), io::ErrorKind::TimedOut);
        assert_eq!(Error::ConnectionClosed.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(
            Error::EncryptionNotSupported.kind(),
            io::ErrorKind::PermissionDenied
        );
        assert_eq!(
            Error::InvalidChunkSize("zz".into()).kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_would_block() {
        let err = Error::Io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(err.is_would_block());
        assert!(!Error::Timeout.is_would_block());
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
