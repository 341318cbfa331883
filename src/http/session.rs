//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections. The
//! connection only ever talks to a `SessionOps`; upgrading to TLS swaps
//! the plain session for an encrypted one over the same socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps: Send {
    /// The underlying socket
    fn stream(&self) -> &TcpStream;

    /// Bytes already decrypted and waiting to be read
    fn pending(&self) -> usize {
        0
    }

    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation.
    /// A `None` timeout waits indefinitely. Interrupted polls are retried.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream(), events, timeout)
    }

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flush any data buffered by the session layer
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Close the session
    fn close(&mut self) -> io::Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Poll a socket descriptor for readiness
pub fn poll_fd(stream: &TcpStream, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd: stream.as_raw_fd(),
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1); // -1 = infinite

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        return Ok(result > 0);
    }
}

/// Decides whether a stalled read or write keeps waiting
///
/// Called each time the I/O deadline expires; returning false fails the
/// operation with a timeout.
pub trait TimeoutCallback: Send {
    fn keep_waiting(&mut self) -> bool;
}

impl<F> TimeoutCallback for F
where
    F: FnMut() -> bool + Send,
{
    fn keep_waiting(&mut self) -> bool {
        self()
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Give the socket back, e.g. to hand it to a TLS back end
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);

        // Poll for read
        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());

        // Read data
        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_poll_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Don't send anything - test timeout
        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let session = FdSessionOps::new(stream);
        assert!(!session
            .poll(PollEvents::Read, Some(Duration::from_millis(50)))
            .unwrap());

        handle.join().unwrap();
    }

    #[test]
    fn test_closure_timeout_callback() {
        let mut calls = 0;
        let mut cb = move || {
            calls += 1;
            calls < 3
        };
        assert!(cb.keep_waiting());
        assert!(cb.keep_waiting());
        assert!(!cb.keep_waiting());
    }
}
