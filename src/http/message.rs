//! HTTP protocol vocabulary
//!
//! Methods, versions, status codes and the connection states one
//! request/response exchange moves through.

use super::{Error, Result};
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPTIONS" => Ok(Method::Options),
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    /// State a connection enters once this request has been sent or received
    pub fn request_state(&self) -> State {
        match self {
            Method::Options => State::Options,
            Method::Get => State::Get,
            Method::Head => State::Head,
            Method::Post => State::Post,
            Method::Put => State::Put,
            Method::Delete => State::Delete,
            Method::Trace => State::Trace,
            Method::Connect => State::Connect,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    Http09,
    Http10,
    Http11,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/0.9" => Ok(Version::Http09),
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    /// Map a major/minor pair onto a known version
    pub fn from_parts(major: u32, minor: u32) -> Result<Self> {
        match (major, minor) {
            (0, 9) => Ok(Version::Http09),
            (1, 0) => Ok(Version::Http10),
            (1, _) => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(format!("HTTP/{}.{}", major, minor))),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http09 => "HTTP/0.9",
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

/// HTTP status code
///
/// Wire codes are 100-599. Codes from 1000 up are private to the engine
/// and report local conditions; they never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a status from a wire code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Content Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            421 => "Misdirected Request",
            422 => "Unprocessable Content",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            1000 => "Connection Error",
            1001 => "Authorization Canceled",
            1002 => "PKI Error",
            1003 => "Encryption Required",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a redirection status (3xx)
    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Check if this is an engine-private code
    pub fn is_synthetic(&self) -> bool {
        self.code >= 1000
    }

    pub const CONTINUE: Status = Status { code: 100 };
    pub const SWITCHING_PROTOCOLS: Status = Status { code: 101 };
    pub const OK: Status = Status { code: 200 };
    pub const CREATED: Status = Status { code: 201 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const MULTIPLE_CHOICES: Status = Status { code: 300 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const UNAUTHORIZED: Status = Status { code: 401 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const EXPECTATION_FAILED: Status = Status { code: 417 };
    pub const UPGRADE_REQUIRED: Status = Status { code: 426 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };
    pub const VERSION_NOT_SUPPORTED: Status = Status { code: 505 };

    /// Local connection or protocol failure
    pub const ERROR: Status = Status { code: 1000 };
    /// The user canceled an authentication prompt
    pub const AUTHORIZATION_CANCELED: Status = Status { code: 1001 };
    /// Certificate or trust failure
    pub const PKI_ERROR: Status = Status { code: 1002 };
    /// The request must be retried over an encrypted connection
    pub const ENCRYPTION_REQUIRED: Status = Status { code: 1003 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Which end of the exchange a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Encryption policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// Never encrypt
    Never,
    /// Encrypt when the peer asks for it
    #[default]
    IfRequested,
    /// Upgrade in band before the first exchange
    Required,
    /// Encrypt from the first byte
    Always,
}

/// Connection states for one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// I/O or framing failure; the exchange cannot continue
    Error,
    /// Idle, between exchanges
    Waiting,
    Options,
    Get,
    /// GET response body in flight
    GetSend,
    Head,
    Post,
    /// POST request body in flight
    PostRecv,
    /// POST response in flight
    PostSend,
    Put,
    /// PUT request body in flight
    PutRecv,
    Delete,
    Trace,
    Connect,
    /// Request fully received, response status not yet sent
    Status,
    UnknownMethod,
    UnknownVersion,
}

impl State {
    /// State after a request line has been sent (client) or received (server)
    pub fn on_request(method: Method) -> State {
        match method {
            Method::Post => State::PostRecv,
            Method::Put => State::PutRecv,
            other => other.request_state(),
        }
    }

    /// State after a received header section ends
    pub fn on_headers_complete(self) -> State {
        match self {
            State::Get => State::GetSend,
            State::Post => State::PostRecv,
            State::PostRecv => State::PostSend,
            State::Put => State::PutRecv,
            State::PostSend | State::Head => self,
            _ => State::Waiting,
        }
    }

    /// State after a server has sent a final response header section
    pub fn on_response_sent(self) -> State {
        match self {
            State::Get => State::GetSend,
            State::PostRecv => State::PostSend,
            State::PutRecv => State::Status,
            _ => self,
        }
    }

    /// State after the last byte of a body has been read or written
    pub fn on_body_complete(self) -> State {
        match self {
            State::PostRecv => State::PostSend,
            State::PutRecv => State::Status,
            _ => State::Waiting,
        }
    }

    /// Whether a request body is flowing in this state
    pub fn is_request_body(&self) -> bool {
        matches!(self, State::PostRecv | State::PutRecv)
    }

    /// Whether a response body is flowing in this state
    pub fn is_response_body(&self) -> bool {
        matches!(self, State::GetSend | State::PostSend)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Error => "ERROR",
            State::Waiting => "WAITING",
            State::Options => "OPTIONS",
            State::Get => "GET",
            State::GetSend => "GET_SEND",
            State::Head => "HEAD",
            State::Post => "POST",
            State::PostRecv => "POST_RECV",
            State::PostSend => "POST_SEND",
            State::Put => "PUT",
            State::PutRecv => "PUT_RECV",
            State::Delete => "DELETE",
            State::Trace => "TRACE",
            State::Connect => "CONNECT",
            State::Status => "STATUS",
            State::UnknownMethod => "UNKNOWN_METHOD",
            State::UnknownVersion => "UNKNOWN_VERSION",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
