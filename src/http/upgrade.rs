//! Encryption: starting TLS, in-band upgrade and peer validation
//!
//! A client with the `Required` policy that is not yet encrypted probes
//! the server with `OPTIONS *` carrying `Connection: Upgrade`. A
//! `101 Switching Protocols` answer turns the socket into a TLS session
//! before the final response is read; any other answer leaves the
//! connection in the clear, which is reported as an error and closes it.

use super::connection::{Connection, Transport};
use super::field::Field;
use super::tls::{PeerIdentity, TlsError, TrustResult};
use super::{Encryption, Error, Method, Result, Role, State, Status, UPGRADE_PROTOCOLS};

impl Connection {
    /// Change the encryption policy and apply it to the live connection
    ///
    /// Clients reconnect to switch to or from `Always` and upgrade in band
    /// for `Required`. Servers start TLS on the accepted socket; this is
    /// how a server completes an upgrade after answering `101`.
    pub fn set_encryption(&mut self, encryption: Encryption) -> Result<()> {
        self.encryption = encryption;
        let encrypted = self.is_encrypted();

        match (self.role, encryption) {
            (Role::Client, Encryption::Always) if !encrypted => self.reconnect(),
            (Role::Client, Encryption::Never) if encrypted => self.reconnect(),
            (Role::Client, Encryption::Required) if !encrypted => self.tls_upgrade(),
            (Role::Server, Encryption::Never) if encrypted => Err(self.fail(Error::InvalidState(
                "Cannot turn off encryption on an encrypted connection".to_string(),
            ))),
            (Role::Server, Encryption::Always | Encryption::Required) if !encrypted => {
                self.start_tls()
            }
            _ => Ok(()),
        }
    }

    /// Run the TLS handshake on the plain socket
    pub(crate) fn start_tls(&mut self) -> Result<()> {
        let Some(backend) = self.tls_backend.clone() else {
            self.status = Status::PKI_ERROR;
            return Err(self.fail(TlsError::NoBackend.into()));
        };

        let stream = match self.transport.take() {
            Some(Transport::Plain(plain)) => plain.into_inner(),
            Some(tls @ Transport::Tls(_)) => {
                self.transport = Some(tls);
                return Ok(());
            }
            None => return Err(self.fail(Error::NotConnected)),
        };

        if !self.rbuf.is_empty() {
            log::warn!(
                "{}: discarding {} buffered bytes before TLS handshake",
                self.hostname,
                self.rbuf.len()
            );
            self.rbuf.clear();
        }

        // The handshake runs blocking, bounded by the I/O timeout
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;

        let session = match backend.start(stream, self.role, &self.hostname) {
            Ok(session) => session,
            Err(e) => {
                self.state = State::Error;
                self.status = Status::PKI_ERROR;
                return Err(self.fail(e.into()));
            }
        };

        let setup = session
            .stream()
            .set_read_timeout(None)
            .and_then(|_| session.stream().set_write_timeout(None))
            .and_then(|_| session.stream().set_nonblocking(!self.blocking));

        let identity = session.peer_identity();
        log::debug!(
            "{}: TLS started ({})",
            self.hostname,
            session.protocol_version()
        );
        self.transport = Some(Transport::Tls(session));
        setup?;

        match self.role {
            Role::Client => self.validate_peer(identity),
            Role::Server => {
                self.peer_identity = identity;
                Ok(())
            }
        }
    }

    /// Check a server identity against the one seen on earlier connections
    ///
    /// A changed identity is only accepted when the trust store vouches
    /// for it. Without an earlier identity the trust store may still
    /// reject a changed or expired one.
    fn validate_peer(&mut self, identity: Option<PeerIdentity>) -> Result<()> {
        let Some(identity) = identity else {
            return Ok(());
        };

        let changed = self
            .peer_identity
            .as_ref()
            .map(|previous| previous.fingerprint != identity.fingerprint);

        match changed {
            Some(true) => {
                let result = self
                    .trust_store
                    .as_ref()
                    .map_or(TrustResult::Changed, |s| s.evaluate(&identity, &self.hostname));
                if !result.is_acceptable() {
                    log::warn!("{}: peer credentials changed ({:?})", self.hostname, result);
                    self.disconnect();
                    self.status = Status::PKI_ERROR;
                    let host = self.hostname.clone();
                    return Err(self.fail(Error::PeerIdentityChanged(host)));
                }
            }
            Some(false) => {}
            None => {
                let result = self
                    .trust_store
                    .as_ref()
                    .map(|s| s.evaluate(&identity, &self.hostname));
                if let Some(result @ (TrustResult::Changed | TrustResult::Expired)) = result {
                    self.disconnect();
                    self.status = Status::PKI_ERROR;
                    let err = TlsError::Untrusted {
                        host: self.hostname.clone(),
                        reason: format!("{:?}", result),
                    };
                    return Err(self.fail(err.into()));
                }
            }
        }

        log::trace!("{}: peer {}", self.hostname, identity);
        self.peer_identity = Some(identity);
        Ok(())
    }

    /// Upgrade a plain client connection to TLS in band
    ///
    /// The field state of the exchange being prepared is put aside for the
    /// probe and restored afterwards.
    pub(crate) fn tls_upgrade(&mut self) -> Result<()> {
        log::debug!("{}: requesting TLS upgrade", self.hostname);

        let saved_fields = std::mem::take(&mut self.fields);
        let saved_encoding = self.data_encoding;
        let saved_remaining = self.remaining;
        let saved_expect = self.expect;

        self.clear_fields();
        self.fields.set(Field::Connection, "upgrade");
        self.fields.set(Field::Upgrade, UPGRADE_PROTOCOLS);
        self.upgrading = true;

        let result = self.send_request(Method::Options, "*").map(|_| loop {
            match self.update() {
                Ok(Status::CONTINUE) if self.state != State::Waiting => continue,
                _ => break,
            }
        });

        if self.is_connected() {
            if let Err(e) = self.flush_body() {
                log::debug!("{}: upgrade probe body: {}", self.hostname, e);
            }
        }

        self.fields = saved_fields;
        self.data_encoding = saved_encoding;
        self.remaining = saved_remaining;
        self.expect = saved_expect;
        self.upgrading = false;

        result?;

        if !self.is_encrypted() {
            log::warn!("{}: server did not upgrade to TLS", self.hostname);
            self.disconnect();
            return Err(self.fail(Error::EncryptionNotSupported));
        }

        Ok(())
    }
}
