//! HTTP line parsing
//!
//! Request lines, status lines and header lines are parsed one line at a
//! time; the connection feeds them from its read buffer.

use super::{Error, Method, Result, State, Status, Version};

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request state for the method, or `UnknownMethod` / `UnknownVersion`
    pub state: State,
    pub method: Option<Method>,
    pub target: String,
    pub version: Version,
}

/// Parse HTTP request line
///
/// Format: METHOD SP request-target SP HTTP/major.minor
///
/// A line without a version is an HTTP/0.9 request. An unrecognized method
/// or version is not an error here; it is reported through the returned
/// state so the server can answer with the matching status.
pub fn parse_request_line(line: &str) -> Result<RequestLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    let (method_str, target, version_str) = match parts.as_slice() {
        [] => return Err(Error::Parse("Bad request line".to_string())),
        [_] => return Err(Error::Parse("Missing request target".to_string())),
        [m, t] => (*m, *t, None),
        [m, t, v] => (*m, *t, Some(*v)),
        _ => {
            return Err(Error::Parse(format!(
                "Invalid request line: expected 3 parts, got {}",
                parts.len()
            )))
        }
    };

    let version = match version_str {
        None => Some(Version::Http09),
        Some(v) => parse_version(v).ok(),
    };

    let method = Method::from_str(method_str).ok();

    let state = match (method, version) {
        (_, None) => State::UnknownVersion,
        (None, _) => State::UnknownMethod,
        (Some(m), Some(_)) => m.request_state(),
    };

    Ok(RequestLine {
        state,
        method,
        target: target.to_string(),
        version: version.unwrap_or_default(),
    })
}

/// Parse HTTP response status line
///
/// Format: HTTP/major.minor SP 3DIGIT SP reason
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let mut parts = line.splitn(3, ' ');

    let version = parts
        .next()
        .ok_or_else(|| Error::Parse(format!("Invalid status line: {}", line)))
        .and_then(parse_version)?;

    let code_str = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| Error::Parse(format!("Invalid status line: {}", line)))?;

    if code_str.len() != 3 {
        return Err(Error::InvalidStatus(code_str.to_string()));
    }

    let code = code_str
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(code_str.to_string()))?;
    let status = Status::new(code)?;

    let reason = parts
        .next()
        .map(|r| r.trim().to_string())
        .unwrap_or_else(|| status.reason_phrase().to_string());

    Ok((version, status, reason))
}

/// Parse `HTTP/major.minor`
pub fn parse_version(s: &str) -> Result<Version> {
    let rest = s
        .strip_prefix("HTTP/")
        .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;
    let (major, minor) = rest
        .split_once('.')
        .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;

    let major = major
        .parse::<u32>()
        .map_err(|_| Error::InvalidVersion(s.to_string()))?;
    let minor = minor
        .parse::<u32>()
        .map_err(|_| Error::InvalidVersion(s.to_string()))?;

    Version::from_parts(major, minor)
}

/// Parse a header line into name and value
///
/// Leading and trailing whitespace around the value is dropped.
pub fn parse_header_line(line: &str) -> Result<(&str, &str)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::InvalidHeader(format!("Bad header name: {}", line)));
    }

    Ok((name, value.trim()))
}
