//! Connection object, lifecycle and buffered socket I/O
//!
//! A `Connection` owns one socket (plain or TLS), a read-ahead buffer, a
//! write buffer and everything describing the exchange in flight. The
//! protocol halves live in `client`, `server`, `transfer`, `chunked`,
//! `coding` and `upgrade`; this module holds the state they share and the
//! byte-level primitives they are built on.

use super::auth::{AuthString, DigestCredentials};
use super::chunked::DataEncoding;
use super::coding::ContentCoding;
use super::field::{Field, FieldTable};
use super::session::{FdSessionOps, PollEvents, SessionOps, TimeoutCallback};
use super::tls::{PeerIdentity, TlsBackend, TlsSession, TrustStore};
use super::{
    Encryption, Error, Result, Role, State, Status, Version, DEFAULT_HTTPS_PORT, MAX_BUFFER,
    MAX_LINE,
};
use crate::net::{self, AddrList};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait applied to non-blocking connections that have no explicit timeout
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Connect timeout used by internal reconnects
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The socket a connection talks through
pub(crate) enum Transport {
    Plain(FdSessionOps),
    Tls(Box<dyn TlsSession>),
}

impl Transport {
    fn stream(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s.stream(),
            Transport::Tls(s) => s.stream(),
        }
    }

    fn pending(&self) -> usize {
        match self {
            Transport::Plain(s) => s.pending(),
            Transport::Tls(s) => s.pending(),
        }
    }

    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        match self {
            Transport::Plain(s) => s.poll(events, timeout),
            Transport::Tls(s) => s.poll(events, timeout),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.close(),
            Transport::Tls(s) => s.close(),
        }
    }
}

/// Connection configuration
///
/// Use `ConnectionConfig::builder()` to create a configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub(crate) encryption: Option<Encryption>,
    pub(crate) blocking: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) keep_alive: bool,
    pub(crate) tls_backend: Option<Arc<dyn TlsBackend>>,
    pub(crate) trust_store: Option<Arc<dyn TrustStore>>,
    pub(crate) user_agent: Option<String>,
    pub(crate) server: Option<String>,
    pub(crate) accept_encoding: Option<String>,
    pub(crate) max_line: usize,
}

impl ConnectionConfig {
    /// Create a new configuration builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Encryption policy for a connection to `port`
    fn encryption_for(&self, port: u16) -> Encryption {
        match self.encryption {
            Some(e) => e,
            None if port == DEFAULT_HTTPS_PORT => Encryption::Always,
            None => Encryption::IfRequested,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfigBuilder::new().build()
    }
}

/// Builder for `ConnectionConfig`
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    fn new() -> Self {
        let product = concat!("ipphttp/", env!("CARGO_PKG_VERSION"));
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                encryption: None,
                blocking: true,
                timeout: None,
                connect_timeout: Some(RECONNECT_TIMEOUT),
                keep_alive: true,
                tls_backend: None,
                trust_store: None,
                user_agent: Some(product.to_string()),
                server: Some(product.to_string()),
                accept_encoding: None,
                max_line: MAX_LINE,
            },
        }
    }

    /// Encryption policy; defaults to `Always` on port 443 and
    /// `IfRequested` elsewhere
    pub fn encryption(mut self, encryption: Encryption) -> Self {
        self.config.encryption = Some(encryption);
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.config.blocking = blocking;
        self
    }

    /// Read/write deadline; `None` waits indefinitely in blocking mode
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// TLS back end used to start or upgrade to encryption
    pub fn tls_backend(mut self, backend: Arc<dyn TlsBackend>) -> Self {
        self.config.tls_backend = Some(backend);
        self
    }

    /// Trust store consulted when a peer identity changes
    pub fn trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.config.trust_store = Some(store);
        self
    }

    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.config.user_agent = Some(value.into());
        self
    }

    pub fn server(mut self, value: impl Into<String>) -> Self {
        self.config.server = Some(value.into());
        self
    }

    pub fn accept_encoding(mut self, value: impl Into<String>) -> Self {
        self.config.accept_encoding = Some(value.into());
        self
    }

    /// Maximum length of a header or chunk-size line
    pub fn max_line(mut self, max: usize) -> Self {
        self.config.max_line = max.clamp(256, MAX_BUFFER);
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Values applied to outgoing messages when the exchange leaves them unset
#[derive(Debug, Clone, Default)]
pub(crate) struct DefaultFields {
    pub(crate) user_agent: Option<String>,
    pub(crate) server: Option<String>,
    pub(crate) accept_encoding: Option<String>,
}

/// One HTTP/1.1 connection, client or server side
pub struct Connection {
    pub(crate) role: Role,
    pub(crate) state: State,
    pub(crate) status: Status,
    pub(crate) version: Version,
    pub(crate) transport: Option<Transport>,
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) addrs: AddrList,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) encryption: Encryption,
    pub(crate) blocking: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) timeout_cb: Option<Box<dyn TimeoutCallback>>,
    pub(crate) activity: Instant,
    pub(crate) error: Option<io::ErrorKind>,
    pub(crate) last_error: String,
    pub(crate) keep_alive: bool,
    pub(crate) fields: FieldTable,
    pub(crate) defaults: DefaultFields,
    pub(crate) rbuf: BytesMut,
    pub(crate) wbuf: BytesMut,
    pub(crate) data_encoding: DataEncoding,
    pub(crate) remaining: u64,
    pub(crate) until_close: bool,
    pub(crate) coding: ContentCoding,
    pub(crate) auth: AuthString,
    pub(crate) digest: Option<DigestCredentials>,
    pub(crate) cookie: Option<String>,
    pub(crate) expect: Option<Status>,
    pub(crate) peer_identity: Option<PeerIdentity>,
    pub(crate) tls_backend: Option<Arc<dyn TlsBackend>>,
    pub(crate) trust_store: Option<Arc<dyn TrustStore>>,
    pub(crate) max_line: usize,
    pub(crate) upgrading: bool,
    pub(crate) reused: bool,
}

impl Connection {
    /// Create an unconnected client connection for `host:port`
    ///
    /// Resolves the host; no socket is opened until `connect`.
    pub fn new(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        let addrs = AddrList::resolve(host, port)?;
        Ok(Self::with_addrs(addrs, host, port, config))
    }

    /// Create an unconnected client connection over a known address list
    pub fn with_addrs(addrs: AddrList, host: &str, port: u16, config: ConnectionConfig) -> Self {
        super::init();

        let mut conn = Self::blank(Role::Client, config, port);
        conn.hostname = host.to_string();
        conn.addrs = addrs;
        conn.clear_fields();
        conn
    }

    /// Create a client connection and connect it
    pub fn open(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        let mut conn = Self::new(host, port, config)?;
        let timeout = conn.connect_timeout;
        conn.connect(timeout, None)?;
        Ok(conn)
    }

    /// Accept the next client on `listener`
    pub fn accept(listener: &TcpListener, config: ConnectionConfig) -> Result<Self> {
        super::init();

        let (stream, addr) = listener.accept()?;
        net::configure_accepted(&stream)?;

        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        let mut conn = Self::blank(Role::Server, config, port);
        conn.hostname = addr.ip().to_string();
        conn.addrs = AddrList::from(addr);
        conn.peer_addr = Some(addr);

        if !conn.blocking {
            stream.set_nonblocking(true)?;
        }
        conn.transport = Some(Transport::Plain(FdSessionOps::new(stream)));

        log::debug!("accepted connection from {}", addr);

        if conn.encryption == Encryption::Always {
            conn.start_tls()?;
        }

        Ok(conn)
    }

    fn blank(role: Role, config: ConnectionConfig, port: u16) -> Self {
        Connection {
            role,
            state: State::Waiting,
            status: Status::CONTINUE,
            version: Version::Http11,
            transport: None,
            hostname: String::new(),
            port,
            addrs: AddrList::default(),
            peer_addr: None,
            encryption: config.encryption_for(port),
            blocking: config.blocking,
            timeout: config.timeout,
            connect_timeout: config.connect_timeout,
            timeout_cb: None,
            activity: Instant::now(),
            error: None,
            last_error: String::new(),
            keep_alive: config.keep_alive,
            fields: FieldTable::new(),
            defaults: DefaultFields {
                user_agent: config.user_agent,
                server: config.server,
                accept_encoding: config.accept_encoding,
            },
            rbuf: BytesMut::with_capacity(MAX_BUFFER),
            wbuf: BytesMut::with_capacity(MAX_BUFFER),
            data_encoding: DataEncoding::Fields,
            remaining: 0,
            until_close: false,
            coding: ContentCoding::Identity,
            auth: AuthString::new(),
            digest: None,
            cookie: None,
            expect: None,
            peer_identity: None,
            tls_backend: config.tls_backend,
            trust_store: config.trust_store,
            max_line: config.max_line,
            upgrading: false,
            reused: false,
        }
    }

    /// Connect (or reconnect) to the first reachable candidate address
    ///
    /// Any existing socket is closed first. Encryption is applied per the
    /// connection's policy once the socket is up: `Always` starts TLS
    /// immediately and `Required` performs an in-band upgrade.
    pub fn connect(&mut self, timeout: Option<Duration>, cancel: Option<&AtomicBool>) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidState("Server connections cannot connect".to_string()));
        }

        self.disconnect();

        let (stream, addr) = match net::connect(&self.addrs, timeout, cancel) {
            Ok(connected) => connected,
            Err(e) => {
                self.status = Status::ERROR;
                return Err(self.fail(e.into()));
            }
        };

        if !self.blocking {
            stream.set_nonblocking(true)?;
        }

        self.transport = Some(Transport::Plain(FdSessionOps::new(stream)));
        self.peer_addr = Some(addr);
        self.error = None;
        self.last_error.clear();
        self.status = Status::CONTINUE;
        self.state = State::Waiting;
        self.version = Version::Http11;
        self.data_encoding = DataEncoding::Fields;
        self.remaining = 0;
        self.until_close = false;
        self.reused = false;
        self.activity = Instant::now();

        match self.encryption {
            Encryption::Always => self.start_tls(),
            Encryption::Required if !self.upgrading => self.tls_upgrade(),
            _ => Ok(()),
        }
    }

    /// Reconnect using the configured connect timeout
    pub fn reconnect(&mut self) -> Result<()> {
        let timeout = self.connect_timeout;
        self.connect(timeout, None)
    }

    /// Shut down the read side of the socket
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            transport.flush()?;
            match transport.stream().shutdown(Shutdown::Read) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Close the connection
    ///
    /// Tears down TLS, the socket and any coding context and drops the
    /// exchange's field values. Closing twice is harmless. The address
    /// list is kept so that `connect` can be used again.
    pub fn close(&mut self) {
        self.disconnect();
        self.fields.clear();
        self.cookie = None;
        self.auth.clear();
        self.digest = None;
        self.state = State::Waiting;
    }

    /// Drop the socket and per-exchange buffers, keeping configuration
    pub(crate) fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                log::debug!("error closing connection to {}: {}", self.hostname, e);
            }
            log::debug!("closed connection to {}", self.hostname);
        }

        self.coding = ContentCoding::Identity;
        self.rbuf.clear();
        self.wbuf.clear();
        self.data_encoding = DataEncoding::Fields;
        self.remaining = 0;
        self.until_close = false;
    }

    // Accessors

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Status of the last response (client) or the response being sent (server)
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addrs(&self) -> &AddrList {
        &self.addrs
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|t| t.stream().local_addr().ok())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Whether a TLS session is active
    pub fn is_encrypted(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls(_)))
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Negotiated TLS protocol version
    pub fn tls_version(&self) -> Option<&'static str> {
        match &self.transport {
            Some(Transport::Tls(s)) => Some(s.protocol_version()),
            _ => None,
        }
    }

    /// Identity of the TLS peer as observed at the last handshake
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer_identity.as_ref()
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Switch between blocking and non-blocking socket I/O
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        self.blocking = blocking;
        if let Some(transport) = self.transport.as_ref() {
            transport.stream().set_nonblocking(!blocking)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the read/write deadline and the callback consulted when it expires
    pub fn set_timeout(&mut self, timeout: Option<Duration>, callback: Option<Box<dyn TimeoutCallback>>) {
        self.timeout = timeout;
        self.timeout_cb = callback;
    }

    /// Time of the last successful socket read or write
    pub fn activity(&self) -> Instant {
        self.activity
    }

    /// Class of the last error, if any
    pub fn error(&self) -> Option<io::ErrorKind> {
        self.error
    }

    /// Message of the last error
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Bytes waiting in the read-ahead buffer
    pub fn pending(&self) -> usize {
        self.rbuf.len()
    }

    // Fields

    /// Value of a field for the current exchange, empty when unset
    pub fn field(&self, field: Field) -> &str {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    /// Set a field, combining or replacing per the field's rules
    ///
    /// Setting `Content-Encoding` while a body is flowing starts the
    /// content coding at once, after sending any buffered body bytes.
    pub fn set_field(&mut self, field: Field, value: &str) -> Result<()> {
        self.fields.set(field, value);

        if field == Field::ContentEncoding && self.data_encoding != DataEncoding::Fields {
            self.start_content_coding(value)?;
        }
        Ok(())
    }

    /// Look up one parameter of a `name=value` list field
    pub fn sub_field(&self, field: Field, name: &str) -> Option<String> {
        self.fields.sub_field(field, name)
    }

    /// Clear the field table for a new exchange
    ///
    /// Client connections get `Host` reseeded from the hostname. Any
    /// pending `Expect` is dropped too.
    pub fn clear_fields(&mut self) {
        self.fields.clear();
        self.expect = None;

        if self.role == Role::Client {
            let host = if self.hostname.starts_with('/') {
                "localhost".to_string()
            } else {
                self.hostname.clone()
            };
            self.fields.set(Field::Host, &host);
        }
    }

    /// Set the value used for a field when an outgoing message leaves it unset
    ///
    /// Only `User-Agent`, `Server` and `Accept-Encoding` have defaults.
    pub fn set_default_field(&mut self, field: Field, value: Option<&str>) -> Result<()> {
        let slot = match field {
            Field::UserAgent => &mut self.defaults.user_agent,
            Field::Server => &mut self.defaults.server,
            Field::AcceptEncoding => &mut self.defaults.accept_encoding,
            other => {
                return Err(Error::InvalidHeader(format!(
                    "{} has no default value",
                    other
                )))
            }
        };
        *slot = value.map(str::to_string);
        Ok(())
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Cookie sent with client requests or set by server responses
    pub fn set_cookie(&mut self, cookie: Option<&str>) {
        self.cookie = cookie.map(str::to_string);
    }

    pub fn expect(&self) -> Option<Status> {
        self.expect
    }

    /// Make the next POST/PUT request carry `Expect: 100-continue`
    pub fn set_expect(&mut self, expect: Option<Status>) {
        self.expect = expect;
    }

    // Error bookkeeping

    /// Record `err` as the connection's last error and hand it back
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        self.error = Some(err.kind());
        self.last_error = err.to_string();
        log::debug!("{}: {}", self.hostname, self.last_error);
        err
    }

    /// Record `err` and put the exchange into the error state
    pub(crate) fn fail_exchange(&mut self, err: Error) -> Error {
        self.state = State::Error;
        self.status = Status::ERROR;
        self.fail(err)
    }

    /// Put the exchange into the error state after a body transfer failure
    ///
    /// Would-block on a non-blocking socket leaves the exchange as it was.
    pub(crate) fn abort_exchange(&mut self, err: Error) -> Error {
        if err.kind() != io::ErrorKind::WouldBlock && self.state != State::Error {
            log::debug!("{}: body transfer failed in state {}", self.hostname, self.state);
            self.state = State::Error;
            self.status = Status::ERROR;
            self.error = Some(err.kind());
            self.last_error = err.to_string();
        }
        err
    }

    // Byte-level I/O

    /// Wait for the socket to become ready, honoring the deadline
    fn wait_ready(&mut self, events: PollEvents) -> Result<()> {
        if self.blocking && self.timeout.is_none() {
            return Ok(());
        }

        let wait = self.timeout.unwrap_or(DEFAULT_WAIT);

        loop {
            let ready = match self.transport.as_ref() {
                Some(transport) => transport.poll(events, Some(wait)),
                None => return Err(self.fail(Error::NotConnected)),
            };

            match ready {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    let keep_waiting = self
                        .timeout_cb
                        .as_mut()
                        .is_some_and(|cb| cb.keep_waiting());
                    if !keep_waiting {
                        return Err(self.fail(Error::Timeout));
                    }
                }
                Err(e) => return Err(self.fail(e.into())),
            }
        }
    }

    /// Read whatever the socket has, up to `buf.len()` bytes
    ///
    /// Returns 0 at end of stream.
    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            self.wait_ready(PollEvents::Read)?;

            let result = match self.transport.as_mut() {
                Some(transport) => transport.read(buf),
                None => return Err(self.fail(Error::NotConnected)),
            };

            match result {
                Ok(n) => {
                    self.activity = Instant::now();
                    log::trace!("read {} bytes from {}", n, self.hostname);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && self.blocking => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e.into()),
                Err(e) => return Err(self.fail(e.into())),
            }
        }
    }

    /// Write all of `data` to the socket
    pub(crate) fn write_some(&mut self, data: &[u8]) -> Result<usize> {
        let mut written = 0;

        while written < data.len() {
            self.wait_ready(PollEvents::Write)?;

            let result = match self.transport.as_mut() {
                Some(transport) => transport.write(&data[written..]),
                None => return Err(self.fail(Error::NotConnected)),
            };

            match result {
                Ok(0) => return Err(self.fail(Error::ConnectionClosed)),
                Ok(n) => {
                    written += n;
                    self.activity = Instant::now();
                }
                Err(e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    continue
                }
                Err(e) => return Err(self.fail(e.into())),
            }
        }

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.flush() {
                return Err(self.fail(e.into()));
            }
        }

        log::trace!("wrote {} bytes to {}", written, self.hostname);
        Ok(written)
    }

    /// Top up the read-ahead buffer; returns the bytes added (0 at EOF)
    pub(crate) fn fill_buffer(&mut self) -> Result<usize> {
        let mut rbuf = std::mem::take(&mut self.rbuf);
        let start = rbuf.len();

        if start >= MAX_BUFFER {
            self.rbuf = rbuf;
            return Ok(0);
        }

        rbuf.resize(MAX_BUFFER, 0);
        let result = self.read_some(&mut rbuf[start..]);
        rbuf.truncate(start + *result.as_ref().unwrap_or(&0));
        self.rbuf = rbuf;

        result
    }

    /// Read body bytes, serving the read-ahead buffer first
    pub(crate) fn read_buffered(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.rbuf.is_empty() {
            let n = buf.len().min(self.rbuf.len());
            self.rbuf.copy_to_slice(&mut buf[..n]);
            return Ok(n);
        }

        self.read_some(buf)
    }

    /// Read one line, without its `\n` or `\r\n` terminator
    ///
    /// End of stream before the terminator is `ConnectionClosed`; a line
    /// longer than the configured maximum is `LineTooLong`.
    pub(crate) fn read_line(&mut self) -> Result<String> {
        let mut scanned = 0;

        loop {
            if let Some(pos) = self.rbuf[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                if end > self.max_line {
                    return Err(self.fail(Error::LineTooLong));
                }

                let raw = self.rbuf.split_to(end + 1);
                let line = raw[..end].strip_suffix(b"\r").unwrap_or(&raw[..end]);
                return Ok(String::from_utf8_lossy(line).into_owned());
            }

            scanned = self.rbuf.len();
            if scanned >= self.max_line || scanned >= MAX_BUFFER {
                return Err(self.fail(Error::LineTooLong));
            }

            if self.fill_buffer()? == 0 {
                return Err(self.fail(Error::ConnectionClosed));
            }
        }
    }

    /// Queue bytes in the write buffer, writing through when it fills
    pub(crate) fn buffer_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.wbuf.is_empty() && self.wbuf.len() + data.len() > MAX_BUFFER {
            self.flush_write()?;
        }

        if self.wbuf.len() + data.len() <= MAX_BUFFER && data.len() < MAX_BUFFER {
            self.wbuf.extend_from_slice(data);
            Ok(())
        } else {
            self.write_framed(data)
        }
    }

    /// Queue one header-section line
    pub(crate) fn write_line(&mut self, line: &str) -> Result<()> {
        self.buffer_write(line.as_bytes())?;
        self.buffer_write(super::CRLF.as_bytes())
    }

    /// Send buffered bytes, through the chunk framing when it is active
    pub fn flush_write(&mut self) -> Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }

        let data = self.wbuf.split().freeze();
        self.write_framed(&data)
    }

    /// Write bytes through the active body framing
    pub(crate) fn write_framed(&mut self, data: &[u8]) -> Result<()> {
        if self.data_encoding == DataEncoding::Chunked {
            self.write_chunk(data)
        } else {
            self.write_some(data).map(|_| ())
        }
    }

    /// Wait up to `timeout` for data to read
    ///
    /// Buffered bytes, pending TLS records and decompressed output count
    /// as available data.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.rbuf.is_empty() || self.coding.has_output() {
            return Ok(true);
        }

        if !self.wbuf.is_empty() {
            self.flush_write()?;
        }

        match self.transport.as_ref() {
            Some(transport) if transport.pending() > 0 => Ok(true),
            Some(transport) => match transport.poll(PollEvents::Read, timeout) {
                Ok(ready) => Ok(ready),
                Err(e) => Err(self.fail(e.into())),
            },
            None => Ok(false),
        }
    }

    /// The socket, when connected
    pub fn socket(&self) -> Option<&TcpStream> {
        self.transport.as_ref().map(|t| t.stream())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::Ordering;
    use std::thread;

    fn loopback() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn client(addr: SocketAddr, config: ConnectionConfig) -> Connection {
        let mut conn = Connection::with_addrs(AddrList::from(addr), "127.0.0.1", addr.port(), config);
        conn.connect(Some(Duration::from_secs(5)), None).unwrap();
        conn
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::builder().build();
        assert_eq!(config.encryption_for(631), Encryption::IfRequested);
        assert_eq!(config.encryption_for(443), Encryption::Always);
        assert!(config.blocking);
        assert!(config.keep_alive);

        let config = ConnectionConfig::builder()
            .encryption(Encryption::Never)
            .build();
        assert_eq!(config.encryption_for(443), Encryption::Never);
    }

    #[test]
    fn test_client_host_field_seeded() {
        let addr: SocketAddr = "127.0.0.1:631".parse().unwrap();
        let mut conn = Connection::with_addrs(AddrList::from(addr), "printer.local.", 631, ConnectionConfig::default());

        assert_eq!(conn.field(Field::Host), "printer.local");
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), State::Waiting);

        conn.set_field(Field::ContentType, "application/ipp").unwrap();
        conn.set_expect(Some(Status::CONTINUE));
        conn.clear_fields();
        assert_eq!(conn.field(Field::ContentType), "");
        assert_eq!(conn.field(Field::Host), "printer.local");
        assert_eq!(conn.expect(), None);
    }

    #[test]
    fn test_read_line_endings() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"first\r\nsecond\n\r\npartial").unwrap();
        });

        let mut conn = client(addr, ConnectionConfig::default());
        assert_eq!(conn.read_line().unwrap(), "first");
        assert_eq!(conn.read_line().unwrap(), "second");
        assert_eq!(conn.read_line().unwrap(), "");

        handle.join().unwrap();

        // Peer closed mid-line
        assert!(matches!(conn.read_line(), Err(Error::ConnectionClosed)));
        assert_eq!(conn.error(), Some(io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_read_line_too_long() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&[b'a'; 600]).unwrap();
            stream.write_all(b"\r\n").unwrap();
        });

        let config = ConnectionConfig::builder().max_line(256).build();
        let mut conn = client(addr, config);
        assert!(matches!(conn.read_line(), Err(Error::LineTooLong)));

        handle.join().unwrap();
    }

    #[test]
    fn test_timeout_callback_gives_up() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let mut conn = client(addr, ConnectionConfig::default());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        conn.set_timeout(
            Some(Duration::from_millis(20)),
            Some(Box::new(move || counter.fetch_add(1, Ordering::SeqCst) < 2)),
        );

        let mut buf = [0u8; 16];
        assert!(matches!(conn.read_some(&mut buf), Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(conn.error(), Some(io::ErrorKind::TimedOut));

        handle.join().unwrap();
    }

    #[test]
    fn test_buffered_writes_flush() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 11];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut conn = client(addr, ConnectionConfig::default());
        conn.buffer_write(b"hello ").unwrap();
        conn.buffer_write(b"world").unwrap();
        assert_eq!(conn.wbuf.len(), 11);
        conn.flush_write().unwrap();
        assert!(conn.wbuf.is_empty());

        assert_eq!(handle.join().unwrap(), b"hello world");
    }

    #[test]
    fn test_wait_and_pending() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(50));
            stream.write_all(b"line\nrest").unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        let mut conn = client(addr, ConnectionConfig::default());
        assert!(!conn.wait(Some(Duration::from_millis(1))).unwrap());
        assert!(conn.wait(Some(Duration::from_secs(2))).unwrap());
        assert_eq!(conn.read_line().unwrap(), "line");
        assert_eq!(conn.pending(), 4);
        assert!(conn.wait(Some(Duration::from_millis(1))).unwrap());

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_canceled() {
        let (_listener, addr) = loopback();
        let cancel = AtomicBool::new(true);

        let mut conn = Connection::with_addrs(AddrList::from(addr), "127.0.0.1", addr.port(), ConnectionConfig::default());
        let result = conn.connect(None, Some(&cancel));
        assert!(matches!(result, Err(Error::Network(net::Error::Canceled))));
        assert_eq!(conn.status(), Status::ERROR);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_accept_and_close_idempotent() {
        let (listener, addr) = loopback();

        let handle = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        let mut conn = Connection::accept(&listener, ConnectionConfig::default()).unwrap();
        assert_eq!(conn.role(), Role::Server);
        assert!(conn.is_connected());
        assert!(!conn.is_encrypted());

        conn.write_some(b"bye").unwrap();
        conn.close();
        conn.close();
        assert!(!conn.is_connected());

        assert_eq!(handle.join().unwrap(), b"bye");
    }
}
