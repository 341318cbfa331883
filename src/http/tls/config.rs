//! TLS configuration
//!
//! This module provides the OpenSSL back end configuration for both
//! client and server connections. A built `TlsConfig` is the `TlsBackend`
//! a connection drives when it starts or upgrades to TLS.

use super::{TlsBackend, TlsSession, TlsSessionOps};
use crate::http::Role;
use openssl::pkey::PKey;
use openssl::ssl::{SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;
use std::fs;
use std::net::TcpStream;
use std::path::Path;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    ///
    /// Accepts the spellings used in `Upgrade` fields ("TLS/1.2") as well
    /// as the OpenSSL ones ("TLSv1.2").
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.trim().to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" | "TLS/1.0" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" | "TLS/1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" | "TLS/1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" | "TLS/1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// Client certificate verification mode (server-side)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVerify {
    /// Don't request client certificates
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("No TLS back end configured")]
    NoBackend,

    #[error("Peer credentials not trusted for {host}: {reason}")]
    Untrusted { host: String, reason: String },
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: openssl::ssl::SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Whether this configuration accepts (server) rather than connects
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect(&self, stream: TcpStream, hostname: &str) -> Result<TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        let servername = self.servername.as_deref().unwrap_or(hostname);
        TlsSessionOps::connect(stream, &self.ctx, servername)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        TlsSessionOps::accept(stream, &self.ctx)
    }
}

impl TlsBackend for TlsConfig {
    fn start(
        &self,
        stream: TcpStream,
        role: Role,
        hostname: &str,
    ) -> Result<Box<dyn TlsSession>, TlsError> {
        let session = match role {
            Role::Client => self.connect(stream, hostname)?,
            Role::Server => self.accept(stream)?,
        };
        Ok(Box::new(session))
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx_builder: Result<SslContextBuilder, TlsError>,
    servername: Option<String>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        let ctx_builder = SslContextBuilder::new(SslMethod::tls_client())
            .map(|mut b| {
                // Printers mostly present self-signed credentials; trust is
                // decided by the connection's trust store instead.
                b.set_verify(SslVerifyMode::NONE);
                b
            })
            .map_err(TlsError::from);

        ClientConfigBuilder {
            ctx_builder,
            servername: None,
        }
    }

    fn with_ctx(
        mut self,
        f: impl FnOnce(&mut SslContextBuilder) -> Result<(), TlsError>,
    ) -> Self {
        if let Ok(builder) = self.ctx_builder.as_mut() {
            if let Err(e) = f(builder) {
                self.ctx_builder = Err(e);
            }
        }
        self
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(self, min: TlsVersion, max: TlsVersion) -> Self {
        self.with_ctx(|b| {
            b.set_min_proto_version(Some(min.to_openssl_version()))?;
            b.set_max_proto_version(Some(max.to_openssl_version()))?;
            Ok(())
        })
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(self, ciphers: &str) -> Self {
        self.with_ctx(|b| Ok(b.set_cipher_list(ciphers)?))
    }

    /// Set SNI servername, overriding the connection hostname
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification against the CA store
    pub fn verify_peer(self, verify: bool) -> Self {
        self.with_ctx(|b| {
            if verify {
                b.set_default_verify_paths()?;
                b.set_verify(SslVerifyMode::PEER);
            } else {
                b.set_verify(SslVerifyMode::NONE);
            }
            Ok(())
        })
    }

    /// Trust the CA certificates in a PEM file
    pub fn ca_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.with_ctx(|b| Ok(b.set_ca_file(path.as_ref())?))
    }

    /// Load client certificate and key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(self, path: P) -> Self {
        let pem = fs::read(path.as_ref()).map_err(TlsError::from);
        self.with_ctx(|b| load_identity(b, &pem?))
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder?.build(),
            is_server: false,
            servername: self.servername,
        })
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    ctx_builder: Result<SslContextBuilder, TlsError>,
    has_cert: bool,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        let ctx_builder = SslContextBuilder::new(SslMethod::tls_server()).map_err(TlsError::from);

        ServerConfigBuilder {
            ctx_builder,
            has_cert: false,
        }
    }

    fn with_ctx(
        mut self,
        f: impl FnOnce(&mut SslContextBuilder) -> Result<(), TlsError>,
    ) -> Self {
        if let Ok(builder) = self.ctx_builder.as_mut() {
            if let Err(e) = f(builder) {
                self.ctx_builder = Err(e);
            }
        }
        self
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(self, min: TlsVersion, max: TlsVersion) -> Self {
        self.with_ctx(|b| {
            b.set_min_proto_version(Some(min.to_openssl_version()))?;
            b.set_max_proto_version(Some(max.to_openssl_version()))?;
            Ok(())
        })
    }

    /// Load server certificate and key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let pem = fs::read(path.as_ref()).map_err(TlsError::from);
        self.has_cert = true;
        self.with_ctx(|b| load_identity(b, &pem?))
    }

    /// Load server certificate and key from PEM text
    pub fn cert_pem(mut self, pem: &[u8]) -> Self {
        self.has_cert = true;
        self.with_ctx(|b| load_identity(b, pem))
    }

    /// Set client certificate verification mode
    pub fn client_verify(self, mode: ClientVerify) -> Self {
        let verify_mode = match mode {
            ClientVerify::None => SslVerifyMode::NONE,
            ClientVerify::Optional => SslVerifyMode::PEER,
            ClientVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        };

        self.with_ctx(|b| {
            b.set_verify(verify_mode);
            Ok(())
        })
    }

    /// Build the TLS configuration
    ///
    /// Without an explicit certificate the built-in self-signed
    /// credentials are used.
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let builder = if self.has_cert {
            self
        } else {
            self.cert_pem(super::builtin_cert::BUILTIN_CERT.as_bytes())
        };

        Ok(TlsConfig {
            ctx: builder.ctx_builder?.build(),
            is_server: true,
            servername: None,
        })
    }
}

fn load_identity(builder: &mut SslContextBuilder, pem: &[u8]) -> Result<(), TlsError> {
    let cert = X509::from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
    builder.set_certificate(&cert)?;

    let key = PKey::private_key_from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    builder.set_private_key(&key)?;

    Ok(())
}
