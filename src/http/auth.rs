//! Authorization string management
//!
//! A connection carries one opaque `Authorization` value. Negotiate and
//! AuthRef values are single-use and are dropped once placed on a request;
//! Digest values are recomputed for every request from the latest nonce.

use super::connection::Connection;
use super::field::parse_params;
use super::{Error, Method, Result};
use md5::Md5;
use sha2::{Digest, Sha256};

/// Opaque authorization value: scheme plus data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthString {
    value: String,
}

impl AuthString {
    pub fn new() -> Self {
        AuthString::default()
    }

    /// Replace the value with `scheme` and optional `data`
    pub fn set(&mut self, scheme: &str, data: Option<&str>) {
        self.value = match data {
            Some(data) if !data.is_empty() => format!("{} {}", scheme, data),
            _ => scheme.to_string(),
        };
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The scheme token, e.g. "Basic"
    pub fn scheme(&self) -> &str {
        self.value.split_whitespace().next().unwrap_or("")
    }

    /// Whether the value must not be replayed on a second request
    pub fn is_single_use(&self) -> bool {
        self.value.starts_with("Negotiate") || self.value.starts_with("AuthRef")
    }
}

/// Digest hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "" | "MD5" => Ok(DigestAlgorithm::Md5),
            "SHA-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(Error::Protocol(format!("Unsupported digest algorithm {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    fn hash(&self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 => format!("{:x}", Md5::digest(data.as_bytes())),
            DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data.as_bytes())),
        }
    }
}

/// Digest credentials and the server state they are answered against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    password: String,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub qop_auth: bool,
    nonce_count: u32,
}

impl DigestCredentials {
    /// Build credentials from a `WWW-Authenticate: Digest ...` challenge
    pub fn from_challenge(username: &str, password: &str, challenge: &str) -> Result<Self> {
        if !challenge
            .trim_start()
            .get(..6)
            .is_some_and(|s| s.eq_ignore_ascii_case("digest"))
        {
            return Err(Error::Protocol(format!("Not a Digest challenge: {}", challenge)));
        }

        let params = parse_params(challenge);
        let param = |name: &str| {
            params
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let nonce = param("nonce")
            .ok_or_else(|| Error::Protocol("Digest challenge without nonce".to_string()))?;

        Ok(DigestCredentials {
            username: username.to_string(),
            password: password.to_string(),
            realm: param("realm").unwrap_or_default(),
            nonce,
            opaque: param("opaque"),
            algorithm: DigestAlgorithm::from_name(&param("algorithm").unwrap_or_default())?,
            qop_auth: param("qop").is_some_and(|q| q.split(',').any(|v| v.trim() == "auth")),
            nonce_count: 0,
        })
    }

    /// Adopt a fresh nonce, restarting the nonce count
    pub fn set_nonce(&mut self, nonce: &str) {
        if nonce != self.nonce {
            self.nonce = nonce.to_string();
            self.nonce_count = 0;
        }
    }

    /// Compute the `Authorization` data for one request
    pub fn authorization(&mut self, method: Method, uri: &str) -> Result<String> {
        let ha1 = self.algorithm.hash(&format!(
            "{}:{}:{}",
            self.username, self.realm, self.password
        ));
        let ha2 = self.algorithm.hash(&format!("{}:{}", method.as_str(), uri));

        let mut data = format!(
            "username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}",
            self.username,
            self.realm,
            self.nonce,
            uri,
            self.algorithm.as_str()
        );

        let response = if self.qop_auth {
            self.nonce_count += 1;
            let nc = format!("{:08x}", self.nonce_count);
            let cnonce = cnonce()?;
            data.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
            self.algorithm
                .hash(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2))
        } else {
            self.algorithm.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        };

        data.push_str(&format!(", response=\"{}\"", response));
        if let Some(opaque) = &self.opaque {
            data.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        Ok(data)
    }
}

fn cnonce() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

impl Connection {
    /// Current authorization value
    pub fn auth_string(&self) -> &str {
        self.auth.as_str()
    }

    /// Set the authorization value sent with requests
    ///
    /// Replaces any Digest credentials.
    pub fn set_auth_string(&mut self, scheme: Option<&str>, data: Option<&str>) {
        self.digest = None;
        match scheme {
            Some(scheme) if !scheme.is_empty() => self.auth.set(scheme, data),
            _ => self.auth.clear(),
        }
    }

    /// Answer a Digest challenge for this and following requests
    pub fn set_digest_credentials(&mut self, username: &str, password: &str, challenge: &str) -> Result<()> {
        let credentials = DigestCredentials::from_challenge(username, password, challenge)?;
        self.auth.set("Digest", None);
        self.digest = Some(credentials);
        Ok(())
    }

    pub fn digest_credentials(&self) -> Option<&DigestCredentials> {
        self.digest.as_ref()
    }

    /// Regenerate the Digest authorization for the request about to go out
    pub(crate) fn refresh_digest(&mut self, method: Method, uri: &str) -> Result<()> {
        if let Some(digest) = self.digest.as_mut() {
            let data = digest.authorization(method, uri)?;
            self.auth.set("Digest", Some(&data));
        }
        Ok(())
    }

    /// Drop single-use authorization once it has been sent
    pub(crate) fn expire_single_use_auth(&mut self) {
        if self.auth.is_single_use() {
            log::trace!("{}: clearing single-use {} authorization", self.hostname, self.auth.scheme());
            self.auth.clear();
        }
    }

    /// Take a `nextnonce` from the response's `Authentication-Info`
    pub(crate) fn capture_next_nonce(&mut self) {
        if let Some(next) = self
            .fields
            .sub_field(super::Field::AuthenticationInfo, "nextnonce")
        {
            if let Some(digest) = self.digest.as_mut() {
                digest.set_nonce(&next);
            }
        }
    }
}
