//! Peer identity
//!
//! The parts of a peer certificate the engine needs to decide whether a
//! peer is the one it talked to before: a SHA-256 fingerprint, the subject
//! and issuer common names, subject alternative names and expiry.

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use std::fmt;

/// Identity of a TLS peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// SHA-256 fingerprint of the DER certificate, lowercase hex
    pub fingerprint: String,
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// End of the validity period
    pub not_after: Option<DateTime<Utc>>,
}

impl PeerIdentity {
    /// Extract the identity from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        PeerIdentity {
            fingerprint: fingerprint(cert),
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
            not_after: not_after(cert),
        }
    }

    /// Whether the validity period has ended
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after.is_some_and(|t| t < now)
    }

    /// Whether the certificate names `hostname`
    ///
    /// Matches the subject alternative names (with single-label wildcards)
    /// and falls back to the common name when there are none.
    pub fn matches_host(&self, hostname: &str) -> bool {
        let hostname = hostname
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.');

        if self.subject_alt_names.is_empty() {
            return name_matches(&self.subject, hostname);
        }

        self.subject_alt_names.iter().any(|san| {
            if let Some(dns) = san.strip_prefix("DNS:") {
                name_matches(dns, hostname)
            } else if let Some(ip) = san.strip_prefix("IP:") {
                ip.eq_ignore_ascii_case(hostname)
            } else {
                false
            }
        })
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject, self.fingerprint)
    }
}

fn name_matches(pattern: &str, hostname: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        match hostname.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(hostname)
    }
}

fn fingerprint(cert: &X509Ref) -> String {
    match cert.digest(MessageDigest::sha256()) {
        Ok(digest) => digest.iter().map(|b| format!("{:02x}", b)).collect(),
        Err(_) => String::new(),
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                let addr = match ip.len() {
                    4 => <[u8; 4]>::try_from(ip).ok().map(std::net::IpAddr::from),
                    16 => <[u8; 16]>::try_from(ip).ok().map(std::net::IpAddr::from),
                    _ => None,
                };
                if let Some(addr) = addr {
                    names.push(format!("IP:{}", addr));
                }
            }
        }
    }

    names
}

fn not_after(cert: &X509Ref) -> Option<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(cert.not_after()).ok()?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
}
