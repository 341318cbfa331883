//! Client half of the exchange
//!
//! Sending requests, reading response header sections and the header
//! reading loop shared with the server half (`update`).

use super::connection::Connection;
use super::field::Field;
use super::parser::{parse_header_line, parse_status_line};
use super::{DataEncoding, Encryption, Error, Method, Result, Role, State, Status, UPGRADE_PROTOCOLS};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Bytes of a request target that cannot go on the wire as they are.
/// Non-ASCII bytes are always encoded.
const TARGET: &AsciiSet = &CONTROLS.add(b' ');

/// Percent-encode a request target
pub(crate) fn encode_target(target: &str) -> String {
    utf8_percent_encode(target, TARGET).to_string()
}

/// `Host` value with the connection port appended when it has none
fn host_with_port(host: &str, port: u16) -> String {
    let has_port = match host.rfind(']') {
        Some(end) => host[end..].contains(':'),
        None => host.contains(':'),
    };

    if has_port || host.starts_with('/') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

impl Connection {
    /// Send a request header section
    ///
    /// Fields set since the last exchange go out with the request and are
    /// cleared afterwards. A connection left unusable by the previous
    /// exchange is reconnected first, and a header write that fails on a
    /// reused connection is retried once on a fresh one.
    pub fn send_request(&mut self, method: Method, target: &str) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidState("Only clients send requests".to_string()));
        }

        if !self.fields.is_set(Field::UserAgent) {
            if let Some(agent) = self.defaults.user_agent.clone() {
                self.fields.set(Field::UserAgent, &agent);
            }
        }
        if !self.fields.is_set(Field::AcceptEncoding) {
            if let Some(encoding) = self.defaults.accept_encoding.clone() {
                self.fields.set(Field::AcceptEncoding, &encoding);
            }
        }

        let target = encode_target(target);
        self.refresh_digest(method, &target)?;

        if self.transport.is_none()
            || self.status == Status::ERROR
            || self.status.code() >= Status::BAD_REQUEST.code()
        {
            log::debug!("{}: reconnecting before {}", self.hostname, method);
            self.reconnect()?;
        }

        if !self.wbuf.is_empty() && self.flush_write().is_err() {
            self.reconnect()?;
        }

        if let Err(e) = self.send_headers(method, &target) {
            if !self.reused {
                return Err(e);
            }

            log::debug!("{}: resending {} on a new connection: {}", self.hostname, method, e);
            self.reconnect()?;
            self.send_headers(method, &target)?;
        }

        self.set_length()?;
        let encoding = self.fields.get(Field::ContentEncoding).to_string();
        self.start_content_coding(&encoding)?;
        self.clear_fields();

        self.expire_single_use_auth();
        self.reused = true;

        Ok(())
    }

    fn send_headers(&mut self, method: Method, target: &str) -> Result<()> {
        self.state = State::on_request(method);
        self.data_encoding = DataEncoding::Fields;
        self.status = Status::CONTINUE;

        if self.encryption == Encryption::Required && !self.is_encrypted() {
            self.fields.replace(Field::Connection, "Upgrade");
            self.fields.replace(Field::Upgrade, UPGRADE_PROTOCOLS);
        }

        if !self.auth.is_empty() {
            let auth = self.auth.as_str().to_string();
            self.fields.replace(Field::Authorization, &auth);
        }

        log::debug!("{}: {} {} {}", self.hostname, method, target, self.version);

        let mut head = format!("{} {} {}\r\n", method, target, self.version);
        for (field, value) in self.fields.iter() {
            match field {
                Field::Cookie | Field::SetCookie | Field::Expect => continue,
                Field::Host => {
                    head.push_str(&format!("Host: {}\r\n", host_with_port(value, self.port)));
                }
                _ => head.push_str(&format!("{}: {}\r\n", field, value)),
            }
        }

        if let Some(cookie) = &self.cookie {
            head.push_str(&format!("Cookie: {}\r\n", cookie));
        }

        if self.expect == Some(Status::CONTINUE) && self.state.is_request_body() {
            head.push_str("Expect: 100-continue\r\n");
        }

        head.push_str("\r\n");

        if let Err(e) = self.buffer_write(head.as_bytes()).and_then(|_| self.flush_write()) {
            self.status = Status::ERROR;
            return Err(e);
        }

        Ok(())
    }

    /// Process incoming header lines until the section ends
    ///
    /// Clients read a status line first; servers call this after
    /// `read_request`. Returns the status of the exchange. `CONTINUE`
    /// means an interim `100 Continue` arrived (or the connection is
    /// idle) and the caller should call again for the final status.
    pub fn update(&mut self) -> Result<Status> {
        if !self.wbuf.is_empty() {
            self.flush_write()?;
        }

        if self.state == State::Waiting {
            return Ok(Status::CONTINUE);
        }

        loop {
            let line = match self.read_line() {
                Ok(line) => line,
                Err(e) => {
                    self.state = State::Error;
                    self.status = Status::ERROR;
                    return Err(e);
                }
            };

            if line.is_empty() {
                return self.end_of_headers();
            }

            if self.role == Role::Client && line.starts_with("HTTP/") {
                let (version, status, reason) = match parse_status_line(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => return Err(self.fail_exchange(e)),
                };

                log::debug!("{}: {} {}", self.hostname, status.code(), reason);
                self.fields.clear();
                self.version = version;
                self.status = status;
                continue;
            }

            let (name, value) = match parse_header_line(&line) {
                Ok(parsed) => parsed,
                Err(e) => return Err(self.fail_exchange(e)),
            };

            let Some(field) = Field::from_name(name) else {
                log::trace!("{}: ignoring field {}", self.hostname, name);
                continue;
            };

            match (self.role, field) {
                (Role::Client, Field::SetCookie) | (Role::Server, Field::Cookie) => {
                    self.cookie = Some(value.to_string());
                }
                (Role::Server, Field::Expect) => {
                    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
                    self.expect = digits.parse().ok().and_then(|code| Status::new(code).ok());
                }
                _ => {}
            }

            self.fields.set(field, value);
        }
    }

    fn end_of_headers(&mut self) -> Result<Status> {
        if self.status == Status::CONTINUE {
            // Interim response; the final status follows
            return Ok(Status::CONTINUE);
        }

        if self.role == Role::Client
            && self.status == Status::SWITCHING_PROTOCOLS
            && !self.is_encrypted()
        {
            if let Err(e) = self.start_tls() {
                self.disconnect();
                self.state = State::Error;
                self.status = Status::ERROR;
                return Err(e);
            }
            return Ok(Status::CONTINUE);
        }

        if self.role == Role::Client {
            self.capture_next_nonce();
        }

        self.set_length()?;
        self.state = self.state.on_headers_complete();

        let encoding = self.fields.get(Field::ContentEncoding).to_string();
        self.start_content_coding(&encoding)?;

        let receiving = match self.role {
            Role::Client => matches!(self.state, State::GetSend | State::PostSend | State::Head),
            Role::Server => self.state.is_request_body(),
        };
        if receiving
            && self.data_encoding == DataEncoding::Length
            && self.remaining == 0
            && !self.until_close
        {
            self.end_body();
        }

        log::trace!("{}: headers complete, state {}", self.hostname, self.state);

        if self.role == Role::Client
            && self.status == Status::UPGRADE_REQUIRED
            && self.encryption != Encryption::Never
            && !self.is_encrypted()
        {
            self.flush_body()?;
            self.set_encryption(Encryption::Required)?;
            return Ok(Status::UPGRADE_REQUIRED);
        }

        Ok(self.status)
    }

    /// Read the final response status, skipping interim responses
    pub fn read_response_status(&mut self) -> Result<Status> {
        loop {
            let status = self.update()?;
            if status != Status::CONTINUE || self.state == State::Waiting {
                return Ok(status);
            }
        }
    }

    pub fn get(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Get, target)
    }

    pub fn head(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Head, target)
    }

    pub fn post(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Post, target)
    }

    pub fn put(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Put, target)
    }

    pub fn delete(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Delete, target)
    }

    pub fn options(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Options, target)
    }

    pub fn trace(&mut self, target: &str) -> Result<()> {
        self.send_request(Method::Trace, target)
    }
}
