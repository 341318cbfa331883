//! HTTP header field table
//!
//! Fields are identified by a fixed `Field` enumeration and stored in a
//! table indexed by that identifier. A handful of list-valued fields
//! combine repeated values with `", "`; every other field is replaced on
//! set. Unknown field names are not stored.

use std::fmt;

macro_rules! fields {
    ($($variant:ident => $name:literal,)*) => {
        /// Recognized header fields
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Field {
            $($variant,)*
        }

        impl Field {
            /// Every recognized field, in table order
            pub const ALL: &'static [Field] = &[$(Field::$variant,)*];

            /// Canonical spelling of the field name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Field::$variant => $name,)*
                }
            }
        }
    };
}

fields! {
    AcceptLanguage => "Accept-Language",
    AcceptRanges => "Accept-Ranges",
    Authorization => "Authorization",
    Connection => "Connection",
    ContentEncoding => "Content-Encoding",
    ContentLanguage => "Content-Language",
    ContentLength => "Content-Length",
    ContentLocation => "Content-Location",
    ContentMd5 => "Content-MD5",
    ContentRange => "Content-Range",
    ContentType => "Content-Type",
    ContentVersion => "Content-Version",
    Date => "Date",
    Host => "Host",
    IfModifiedSince => "If-Modified-Since",
    IfUnmodifiedSince => "If-Unmodified-Since",
    KeepAlive => "Keep-Alive",
    LastModified => "Last-Modified",
    Link => "Link",
    Location => "Location",
    Range => "Range",
    Referer => "Referer",
    RetryAfter => "Retry-After",
    TransferEncoding => "Transfer-Encoding",
    Upgrade => "Upgrade",
    UserAgent => "User-Agent",
    WwwAuthenticate => "WWW-Authenticate",
    AcceptEncoding => "Accept-Encoding",
    Allow => "Allow",
    Server => "Server",
    AuthenticationInfo => "Authentication-Info",
    AccessControlAllowCredentials => "Access-Control-Allow-Credentials",
    AccessControlAllowHeaders => "Access-Control-Allow-Headers",
    AccessControlAllowMethods => "Access-Control-Allow-Methods",
    AccessControlAllowOrigin => "Access-Control-Allow-Origin",
    AccessControlExposeHeaders => "Access-Control-Expose-Headers",
    AccessControlMaxAge => "Access-Control-Max-Age",
    AccessControlRequestHeaders => "Access-Control-Request-Headers",
    AccessControlRequestMethod => "Access-Control-Request-Method",
    OptionalWwwAuthenticate => "Optional-WWW-Authenticate",
    Origin => "Origin",
    Oscore => "OSCORE",
    StrictTransportSecurity => "Strict-Transport-Security",
    Accept => "Accept",
    CacheControl => "Cache-Control",
    Etag => "ETag",
    IfMatch => "If-Match",
    IfNoneMatch => "If-None-Match",
    Cookie => "Cookie",
    SetCookie => "Set-Cookie",
    Expect => "Expect",
}

impl Field {
    /// Number of recognized fields
    pub const COUNT: usize = Field::ALL.len();

    /// Look up a field by name, ignoring case
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }

    /// Whether repeated values are joined with `", "` instead of replaced
    pub fn is_combinable(&self) -> bool {
        matches!(
            self,
            Field::AcceptEncoding
                | Field::AcceptLanguage
                | Field::AcceptRanges
                | Field::Allow
                | Field::Link
                | Field::TransferEncoding
                | Field::Upgrade
                | Field::WwwAuthenticate
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header values for one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTable {
    values: Vec<Option<String>>,
}

impl FieldTable {
    /// Create an empty table
    pub fn new() -> Self {
        FieldTable {
            values: vec![None; Field::COUNT],
        }
    }

    /// Value of a field, or an empty string when unset
    pub fn get(&self, field: Field) -> &str {
        self.values[field.index()].as_deref().unwrap_or("")
    }

    /// Whether the field holds a non-empty value
    pub fn is_set(&self, field: Field) -> bool {
        self.values[field.index()]
            .as_deref()
            .is_some_and(|v| !v.is_empty())
    }

    /// Set a field, joining with the existing value for combinable fields
    pub fn set(&mut self, field: Field, value: &str) {
        let value = normalize(field, value);
        let slot = &mut self.values[field.index()];

        match slot {
            Some(existing) if field.is_combinable() && !existing.is_empty() => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => *slot = Some(value),
        }
    }

    /// Set a field, discarding any existing value
    pub fn replace(&mut self, field: Field, value: &str) {
        self.values[field.index()] = Some(normalize(field, value));
    }

    /// Remove a field
    pub fn remove(&mut self, field: Field) -> Option<String> {
        self.values[field.index()].take()
    }

    /// Clear every field
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Iterate over the non-empty fields in table order
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        Field::ALL
            .iter()
            .zip(self.values.iter())
            .filter_map(|(f, v)| match v.as_deref() {
                Some(v) if !v.is_empty() => Some((*f, v)),
                _ => None,
            })
    }

    /// Look up one parameter in a `name=value, name="value"` list
    ///
    /// Used for the parameters of `WWW-Authenticate` and
    /// `Authentication-Info`. A leading auth scheme token is skipped.
    pub fn sub_field(&self, field: Field, name: &str) -> Option<String> {
        parse_params(self.get(field))
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in self.iter() {
            writeln!(f, "{}: {}", field, value)?;
        }
        Ok(())
    }
}

/// Host values are stored the way they go on the wire: IPv6 literals in
/// brackets and no trailing root dot.
fn normalize(field: Field, value: &str) -> String {
    if field != Field::Host {
        return value.to_string();
    }

    if !value.starts_with('[') {
        if let Some(colon) = value.find(':') {
            if value[colon + 1..].contains(':') {
                return format!("[{}]", value);
            }
        }
    }

    value.strip_suffix('.').unwrap_or(value).to_string()
}

/// Split an authentication parameter list into name/value pairs
pub(crate) fn parse_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' || c.is_whitespace() {
                break;
            }
            name.push(c);
            chars.next();
        }

        if name.is_empty() {
            break;
        }

        while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
            chars.next();
        }

        if chars.peek() != Some(&'=') {
            // Scheme token such as "Digest"
            continue;
        }
        chars.next();

        while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
            chars.next();
        }

        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            val.push(escaped);
                        }
                    }
                    _ => val.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                val.push(c);
                chars.next();
            }
        }

        params.push((name, val));
    }

    params
}
