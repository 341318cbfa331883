//! TLS support for HTTP connections
//!
//! The engine never performs a handshake itself. It drives a `TlsBackend`,
//! which turns a connected socket into a `TlsSession`, and asks a
//! `TrustStore` whether the peer behind a session can be relied on.
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ciphers, certificates)
//!    and is the OpenSSL `TlsBackend`
//! 2. `TlsSessionOps` implements `SessionOps` for encrypted I/O
//! 3. The connection code is unchanged by encryption; it only ever talks
//!    to a `SessionOps`
//!
//! # Examples
//!
//! ## Client with TLS
//!
//! ```no_run
//! use ipphttp::http::tls::{TlsConfig, TlsVersion};
//! use ipphttp::http::{Connection, ConnectionConfig, Encryption};
//! use std::sync::Arc;
//!
//! let tls_config = TlsConfig::client()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .build()
//!     .unwrap();
//!
//! let config = ConnectionConfig::builder()
//!     .encryption(Encryption::Required)
//!     .tls_backend(Arc::new(tls_config))
//!     .build();
//! let conn = Connection::open("printer.local", 631, config).unwrap();
//! assert!(conn.is_encrypted());
//! ```
//!
//! ## Server with TLS
//!
//! ```no_run
//! use ipphttp::http::tls::{ClientVerify, TlsConfig};
//! use ipphttp::http::{Connection, ConnectionConfig};
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! let tls_config = TlsConfig::server()
//!     .client_verify(ClientVerify::None)
//!     .build()
//!     .unwrap();
//!
//! let config = ConnectionConfig::builder()
//!     .tls_backend(Arc::new(tls_config))
//!     .build();
//! let listener = TcpListener::bind("127.0.0.1:631").unwrap();
//! let conn = Connection::accept(&listener, config).unwrap();
//! ```

pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod session;
pub mod trust;

pub use cert::PeerIdentity;
pub use config::{
    ClientConfigBuilder, ClientVerify, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion,
};
pub use session::TlsSessionOps;
pub use trust::{TofuTrustStore, TrustResult, TrustStore};

use crate::http::session::SessionOps;
use crate::http::Role;
use std::net::TcpStream;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// An established TLS session
pub trait TlsSession: SessionOps {
    /// Identity presented by the peer, if it sent a certificate
    fn peer_identity(&self) -> Option<PeerIdentity>;

    /// Negotiated protocol version, e.g. "TLSv1.3"
    fn protocol_version(&self) -> &'static str;
}

/// TLS capability the engine drives
///
/// `start` runs the handshake on a connected, blocking socket in the given
/// role. Stopping a session is `SessionOps::close`.
pub trait TlsBackend: Send + Sync {
    fn start(&self, stream: TcpStream, role: Role, hostname: &str) -> Result<Box<dyn TlsSession>>;
}
