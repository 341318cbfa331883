//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::{PeerIdentity, TlsError, TlsSession};
use crate::http::session::SessionOps;
use openssl::ssl::{Ssl, SslContext, SslStream};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream};

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream over the connection's socket.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS session (perform handshake)
    pub fn connect(
        tcp_stream: TcpStream,
        ctx: &SslContext,
        servername: &str,
    ) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(ctx)?;

        // SNI carries host names only
        let servername = servername.trim_start_matches('[').trim_end_matches(']');
        if !servername.is_empty() && servername.parse::<IpAddr>().is_err() {
            ssl.set_hostname(servername)?;
        }

        // The socket is in blocking mode here, so the handshake runs to completion
        let ssl_stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;

        log::debug!(
            "TLS client session established: {}",
            ssl_stream.ssl().version_str()
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(tcp_stream: TcpStream, ctx: &SslContext) -> Result<Self, TlsError> {
        let ssl = Ssl::new(ctx)?;

        let ssl_stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        log::debug!(
            "TLS server session established: {}",
            ssl_stream.ssl().version_str()
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl SessionOps for TlsSessionOps {
    fn stream(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(|e| {
            if e.kind() != io::ErrorKind::WouldBlock && e.kind() != io::ErrorKind::Interrupted {
                self.failed = true;
            }
            e
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).map_err(|e| {
            if e.kind() != io::ErrorKind::WouldBlock && e.kind() != io::ErrorKind::Interrupted {
                self.failed = true;
            }
            e
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            e
        })
    }

    fn close(&mut self) -> io::Result<()> {
        // Send close_notify unless the session already broke
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl TlsSession for TlsSessionOps {
    fn peer_identity(&self) -> Option<PeerIdentity> {
        self.stream
            .ssl()
            .peer_certificate()
            .map(|cert| PeerIdentity::from_x509(&cert))
    }

    fn protocol_version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::{TlsConfig, TlsVersion};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_tls_client_server_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_config = TlsConfig::server()
            .version(TlsVersion::Tls13)
            .build()
            .unwrap();

        let client_config = TlsConfig::client()
            .version(TlsVersion::Tls13)
            .verify_peer(false)
            .build()
            .unwrap();

        let server_handle = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            let mut tls_session = server_config.accept(tcp_stream).unwrap();

            assert!(!tls_session.failed());

            let mut buf = vec![0u8; 5];
            let n = tls_session.read(&mut buf).unwrap();
            assert_eq!(n, 5);
            assert_eq!(&buf[..n], b"Hello");

            let n = tls_session.write(b"World").unwrap();
            assert_eq!(n, 5);

            tls_session.close().unwrap();
        });

        let tcp_stream = TcpStream::connect(addr).unwrap();
        let mut tls_session = client_config.connect(tcp_stream, "localhost").unwrap();

        assert!(!tls_session.failed());
        assert_eq!(tls_session.protocol_version(), "TLSv1.3");

        let n = tls_session.write(b"Hello").unwrap();
        assert_eq!(n, 5);

        let mut buf = vec![0u8; 5];
        let n = tls_session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"World");

        tls_session.close().unwrap();

        server_handle.join().unwrap();
    }

    #[test]
    fn test_peer_identity_after_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_config = TlsConfig::server().build().unwrap();
        let client_config = TlsConfig::client().build().unwrap();

        let server_handle = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            let tls_session = server_config.accept(tcp_stream).unwrap();

            // No client certificate was requested
            assert!(tls_session.peer_identity().is_none());
        });

        let tcp_stream = TcpStream::connect(addr).unwrap();
        let tls_session = client_config.connect(tcp_stream, "127.0.0.1").unwrap();

        let identity = tls_session.peer_identity().unwrap();
        assert_eq!(identity.subject, "localhost");
        assert!(identity.matches_host("127.0.0.1"));

        server_handle.join().unwrap();
    }
}
