//! Network addressing and socket setup
//!
//! Resolves a hostname into an ordered list of candidate addresses and
//! establishes TCP connections from that list with a deadline and a
//! cooperative cancellation flag.

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of the cancellation check while a connect is in flight
const CONNECT_SLICE: Duration = Duration::from_millis(100);

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("No addresses for {0}")]
    NoAddresses(String),

    #[error("Unable to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("Connect timed out")]
    Timeout,

    #[error("Connect canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Ordered list of candidate addresses for one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrList {
    addrs: Vec<SocketAddr>,
}

impl AddrList {
    /// Resolve `host:port` into a candidate list
    pub fn resolve(host: &str, port: u16) -> Result<Self, Error> {
        let lookup = host.trim_start_matches('[').trim_end_matches(']');
        let addrs: Vec<SocketAddr> = (lookup, port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(Error::NoAddresses(host.to_string()));
        }

        log::debug!("resolved {} to {} address(es)", host, addrs.len());
        Ok(AddrList { addrs })
    }

    /// Build a list from already known addresses
    pub fn from_addrs(addrs: Vec<SocketAddr>) -> Self {
        AddrList { addrs }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.addrs.iter()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn first(&self) -> Option<&SocketAddr> {
        self.addrs.first()
    }
}

impl From<SocketAddr> for AddrList {
    fn from(addr: SocketAddr) -> Self {
        AddrList { addrs: vec![addr] }
    }
}

/// Connect to the first reachable address in `addrs`
///
/// Each candidate is tried in order until one connects, the overall
/// deadline expires or `cancel` becomes true. The flag is checked between
/// attempts and while an attempt is pending.
pub fn connect(
    addrs: &AddrList,
    timeout: Option<Duration>,
    cancel: Option<&AtomicBool>,
) -> Result<(TcpStream, SocketAddr), Error> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut last_error = None;

    for addr in addrs.iter() {
        if is_canceled(cancel) {
            return Err(Error::Canceled);
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                Some(deadline - now)
            }
            None => None,
        };

        log::debug!("connecting to {}", addr);
        match connect_one(addr, remaining, cancel) {
            Ok(stream) => {
                log::debug!("connected to {}", addr);
                return Ok((stream, *addr));
            }
            Err(Error::Canceled) => return Err(Error::Canceled),
            Err(err) => {
                log::debug!("connect to {} failed: {}", addr, err);
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::NoAddresses("empty address list".to_string())))
}

fn connect_one(
    addr: &SocketAddr,
    timeout: Option<Duration>,
    cancel: Option<&AtomicBool>,
) -> Result<TcpStream, Error> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;

    match socket.connect(&SockAddr::from(*addr)) {
        Ok(()) => {}
        Err(e) if in_progress(&e) => wait_connected(&socket, addr, timeout, cancel)?,
        Err(source) => return Err(Error::Connect { addr: *addr, source }),
    }

    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

fn wait_connected(
    socket: &Socket,
    addr: &SocketAddr,
    timeout: Option<Duration>,
    cancel: Option<&AtomicBool>,
) -> Result<(), Error> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        if is_canceled(cancel) {
            return Err(Error::Canceled);
        }

        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                (deadline - now).min(CONNECT_SLICE)
            }
            None => CONNECT_SLICE,
        };

        let mut pfd = libc::pollfd {
            fd: socket.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };

        let result = unsafe { libc::poll(&mut pfd, 1, slice.as_millis() as i32) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io(err));
        }

        if result > 0 {
            if let Some(source) = socket.take_error()? {
                return Err(Error::Connect { addr: *addr, source });
            }
            return match socket.peer_addr() {
                Ok(_) => Ok(()),
                Err(source) => Err(Error::Connect { addr: *addr, source }),
            };
        }
    }
}

/// Apply the socket options every accepted connection gets
pub fn configure_accepted(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;
    sock.set_cloexec(true)?;
    Ok(())
}

fn in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

fn is_canceled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_resolve_localhost() {
        let addrs = AddrList::resolve("127.0.0.1", 631).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs.first().unwrap().port(), 631);
    }

    #[test]
    fn test_resolve_bracketed_ipv6() {
        let addrs = AddrList::resolve("[::1]", 8631).unwrap();
        assert!(addrs.first().unwrap().is_ipv6());
    }

    #[test]
    fn test_connect_first_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = listener.local_addr().unwrap();

        // A port nobody listens on, tried first
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let addrs = AddrList::from_addrs(vec![dead, good]);
        let (_stream, addr) = connect(&addrs, Some(Duration::from_secs(5)), None).unwrap();
        assert_eq!(addr, good);
    }

    #[test]
    fn test_connect_canceled() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addrs = AddrList::from(listener.local_addr().unwrap());
        let cancel = AtomicBool::new(true);

        let result = connect(&addrs, None, Some(&cancel));
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[test]
    fn test_connect_empty_list() {
        let result = connect(&AddrList::default(), None, None);
        assert!(matches!(result, Err(Error::NoAddresses(_))));
    }

    #[test]
    fn test_configure_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();

        configure_accepted(&stream).unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
