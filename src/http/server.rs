//! Server half of the exchange
//!
//! A server connection reads a request line with `read_request`, the
//! request header section with `update`, any request body with `read`,
//! and answers with `write_response` followed by `write` for the body.

use super::chunked::DataEncoding;
use super::connection::Connection;
use super::field::Field;
use super::parser::{parse_request_line, RequestLine};
use super::{Error, Result, Role, State, Status, Version, UPGRADE_PROTOCOLS};
use chrono::Utc;

/// Current time as an HTTP date (RFC 1123)
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl Connection {
    /// Read the request line of the next exchange
    ///
    /// The connection must be idle. The returned line's state is also the
    /// connection state; an unknown method or version is reported there
    /// rather than as an error so the caller can answer 501 or 505. The
    /// header section follows through `update`.
    pub fn read_request(&mut self) -> Result<RequestLine> {
        if self.role != Role::Server {
            return Err(Error::InvalidState("Only servers read requests".to_string()));
        }

        if self.state != State::Waiting {
            return Err(Error::InvalidState(format!(
                "Cannot read a request in state {}",
                self.state
            )));
        }

        self.data_encoding = DataEncoding::Fields;
        self.remaining = 0;
        self.until_close = false;
        self.status = Status::OK;
        self.version = Version::Http11;
        self.fields.clear();
        self.expect = None;
        self.cookie = None;

        let line = match self.read_line() {
            Ok(line) => line,
            Err(e) => {
                self.state = State::Error;
                self.status = Status::ERROR;
                return Err(e);
            }
        };

        let request = match parse_request_line(&line) {
            Ok(request) => request,
            Err(e) => return Err(self.fail_exchange(e)),
        };

        log::debug!("{}: {}", self.hostname, line);

        self.state = request.state;
        self.version = request.version;
        Ok(request)
    }

    /// Send a response header section
    ///
    /// The field table goes out as the response fields, so callers clear
    /// the request's fields first. `Date`, `Server` and `Accept-Encoding`
    /// are filled in when unset, and HTTP/1.1 bodies of unknown length are
    /// chunked. A `100 Continue` is sent bare and changes nothing. After
    /// `101` the caller starts TLS with `set_encryption` and sends the
    /// final response over it.
    pub fn write_response(&mut self, status: Status) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::InvalidState("Only servers write responses".to_string()));
        }

        if status == Status::CONTINUE {
            // Interim answer; the request body framing stays in place
            let line = format!("{} 100 Continue\r\n\r\n", self.version);
            return self.write_some(line.as_bytes()).map(|_| ());
        }

        self.status = status;
        self.data_encoding = DataEncoding::Fields;

        if !self.fields.is_set(Field::Date) && status != Status::NOT_MODIFIED {
            self.fields.set(Field::Date, &http_date());
        }
        if !self.fields.is_set(Field::Server) {
            if let Some(server) = self.defaults.server.clone() {
                self.fields.set(Field::Server, &server);
            }
        }
        if !self.fields.is_set(Field::AcceptEncoding) {
            if let Some(encoding) = self.defaults.accept_encoding.clone() {
                self.fields.set(Field::AcceptEncoding, &encoding);
            }
        }

        if !self.keep_alive {
            self.fields.replace(Field::Connection, "close");
        }

        if status == Status::SWITCHING_PROTOCOLS || status == Status::UPGRADE_REQUIRED {
            self.fields.replace(Field::Connection, "Upgrade");
            self.fields.replace(Field::Upgrade, UPGRADE_PROTOCOLS);
            self.fields.replace(Field::ContentLength, "0");
        }

        if self.version == Version::Http11
            && !self.fields.is_set(Field::ContentLength)
            && !self.fields.is_set(Field::TransferEncoding)
            && status.is_success()
            && status != Status::NO_CONTENT
            && matches!(
                self.state,
                State::Get | State::GetSend | State::PostRecv | State::PostSend
            )
        {
            self.fields.set(Field::TransferEncoding, "chunked");
        }

        let mut head = format!("{} {} {}\r\n", self.version, status.code(), status.reason_phrase());
        for (field, value) in self.fields.iter() {
            if !matches!(field, Field::Cookie | Field::SetCookie | Field::Expect) {
                head.push_str(&format!("{}: {}\r\n", field, value));
            }
        }

        if let Some(cookie) = &self.cookie {
            if cookie.contains(';') {
                head.push_str(&format!("Set-Cookie: {}\r\n", cookie));
            } else if self.is_encrypted() {
                head.push_str(&format!("Set-Cookie: {}; path=/; httponly; secure;\r\n", cookie));
            } else {
                head.push_str(&format!("Set-Cookie: {}; path=/; httponly;\r\n", cookie));
            }
        }

        head.push_str("\r\n");

        if let Err(e) = self.buffer_write(head.as_bytes()).and_then(|_| self.flush_write()) {
            self.state = State::Error;
            self.status = Status::ERROR;
            return Err(e);
        }

        log::debug!("{}: sent {}", self.hostname, status);

        if status == Status::SWITCHING_PROTOCOLS {
            self.fields.clear();
            return Ok(());
        }

        self.state = self.state.on_response_sent();
        self.set_length()?;

        let has_body = match self.data_encoding {
            DataEncoding::Length => self.remaining > 0,
            DataEncoding::Chunked => true,
            DataEncoding::Fields => false,
        };
        if !has_body || !self.state.is_response_body() {
            self.data_encoding = DataEncoding::Fields;
            self.remaining = 0;
            self.until_close = false;
            self.state = State::Waiting;
            return Ok(());
        }

        let encoding = self.fields.get(Field::ContentEncoding).to_string();
        self.start_content_coding(&encoding)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ConnectionConfig, Method};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Run `client` against one accepted server connection
    fn serve<F>(config: ConnectionConfig, client: F) -> (Connection, thread::JoinHandle<Vec<u8>>)
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            client(&mut stream);
            let mut response = Vec::new();
            stream.read_to_end(&mut response).unwrap();
            response
        });

        let conn = Connection::accept(&listener, config).unwrap();
        (conn, handle)
    }

    #[test]
    fn test_http_date_format() {
        let date = http_date();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), 29);
        assert_eq!(&date[3..5], ", ");
    }

    #[test]
    fn test_get_with_chunked_response() {
        let (mut conn, handle) = serve(ConnectionConfig::default(), |stream| {
            stream
                .write_all(b"GET /printers HTTP/1.1\r\nHost: localhost:631\r\nCookie: id=7\r\n\r\n")
                .unwrap();
        });

        let request = conn.read_request().unwrap();
        assert_eq!(request.method, Some(Method::Get));
        assert_eq!(request.target, "/printers");
        assert_eq!(conn.state(), State::Get);

        assert_eq!(conn.update().unwrap(), Status::OK);
        assert_eq!(conn.state(), State::GetSend);
        assert_eq!(conn.field(Field::Host), "localhost:631");
        assert_eq!(conn.cookie(), Some("id=7"));

        conn.clear_fields();
        conn.set_field(Field::ContentType, "text/plain").unwrap();
        conn.write_response(Status::OK).unwrap();
        assert_eq!(conn.data_encoding(), DataEncoding::Chunked);

        conn.write(b"printer list").unwrap();
        conn.write(b"").unwrap();
        assert_eq!(conn.state(), State::Waiting);
        conn.close();

        let response = String::from_utf8(handle.join().unwrap()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Transfer-Encoding: chunked\r\n"));
        assert!(response.contains("Date: "));
        assert!(response.contains("Server: ipphttp/"));
        assert!(response.contains("Set-Cookie: id=7; path=/; httponly;\r\n"));
        assert!(response.ends_with("\r\n\r\nc\r\nprinter list\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_post_body_and_expect() {
        let (mut conn, handle) = serve(ConnectionConfig::default(), |stream| {
            stream
                .write_all(b"POST /ipp/print HTTP/1.1\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n")
                .unwrap();

            let mut interim = [0u8; 25];
            stream.read_exact(&mut interim).unwrap();
            assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

            stream.write_all(b"hello").unwrap();
        });

        conn.read_request().unwrap();
        assert_eq!(conn.update().unwrap(), Status::OK);
        assert_eq!(conn.state(), State::PostRecv);
        assert_eq!(conn.expect(), Some(Status::CONTINUE));

        conn.write_response(Status::CONTINUE).unwrap();
        assert_eq!(conn.state(), State::PostRecv);

        assert_eq!(conn.read_to_end().unwrap(), b"hello");
        assert_eq!(conn.state(), State::PostSend);

        conn.clear_fields();
        conn.set_field(Field::ContentLength, "2").unwrap();
        conn.write_response(Status::OK).unwrap();
        assert_eq!(conn.state(), State::PostSend);
        conn.write(b"ok").unwrap();
        assert_eq!(conn.state(), State::Waiting);
        conn.close();

        let response = String::from_utf8(handle.join().unwrap()).unwrap();
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(!response.contains("Transfer-Encoding"));
        assert!(response.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn test_error_response_without_body() {
        let config = ConnectionConfig::builder().keep_alive(false).build();
        let (mut conn, handle) = serve(config, |stream| {
            stream.write_all(b"DELETE /jobs/1 HTTP/1.1\r\n\r\n").unwrap();
        });

        conn.read_request().unwrap();
        assert_eq!(conn.update().unwrap(), Status::OK);
        assert_eq!(conn.state(), State::Waiting);

        conn.write_response(Status::FORBIDDEN).unwrap();
        assert_eq!(conn.state(), State::Waiting);
        conn.close();

        let response = String::from_utf8(handle.join().unwrap()).unwrap();
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(!response.contains("Transfer-Encoding"));
    }

    #[test]
    fn test_unknown_method_and_version() {
        let (mut conn, handle) = serve(ConnectionConfig::default(), |stream| {
            stream.write_all(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap();
        });

        let request = conn.read_request().unwrap();
        assert_eq!(request.state, State::UnknownMethod);
        assert_eq!(conn.state(), State::UnknownMethod);
        conn.update().unwrap();
        conn.write_response(Status::NOT_IMPLEMENTED).unwrap();
        conn.close();

        let response = String::from_utf8(handle.join().unwrap()).unwrap();
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    }

    #[test]
    fn test_read_request_requires_idle() {
        let (mut conn, handle) = serve(ConnectionConfig::default(), |stream| {
            stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        });

        conn.read_request().unwrap();
        assert!(matches!(conn.read_request(), Err(Error::InvalidState(_))));
        conn.close();
        handle.join().unwrap();
    }
}
