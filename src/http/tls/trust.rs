//! Credential trust
//!
//! A `TrustStore` decides whether a peer identity observed for a hostname
//! can be relied on. `TofuTrustStore` trusts the first identity it sees
//! for each host and flags later changes, optionally persisting what it
//! has learned to a file.

use super::{PeerIdentity, TlsError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Outcome of evaluating a peer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustResult {
    /// Identity matches what is known for the host
    Trusted,
    /// Identity differs from what is known for the host
    Changed,
    /// Identity is past its validity period
    Expired,
    /// A newer certificate for the same subject replaced the known one
    Renewed,
    /// Nothing is known about the host
    Unknown,
}

impl TrustResult {
    /// Whether a connection may proceed with this result
    pub fn is_acceptable(&self) -> bool {
        matches!(self, TrustResult::Trusted | TrustResult::Renewed)
    }
}

/// Credential-trust capability
pub trait TrustStore: Send + Sync {
    /// Evaluate `identity` as presented by `hostname`
    fn evaluate(&self, identity: &PeerIdentity, hostname: &str) -> TrustResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Known {
    fingerprint: String,
    subject: String,
    not_after: Option<DateTime<Utc>>,
}

impl From<&PeerIdentity> for Known {
    fn from(identity: &PeerIdentity) -> Self {
        Known {
            fingerprint: identity.fingerprint.clone(),
            subject: identity.subject.clone(),
            not_after: identity.not_after,
        }
    }
}

/// Trust-on-first-use store
pub struct TofuTrustStore {
    known: Mutex<HashMap<String, Known>>,
    path: Option<PathBuf>,
    trust_first: bool,
}

impl TofuTrustStore {
    /// Create an empty in-memory store that trusts first contact
    pub fn new() -> Self {
        TofuTrustStore {
            known: Mutex::new(HashMap::new()),
            path: None,
            trust_first: true,
        }
    }

    /// Create a store backed by `path`, loading it if it exists
    ///
    /// Each line holds `hostname fingerprint not-after subject`, with `-`
    /// for an unknown expiry.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TlsError> {
        let path = path.as_ref().to_path_buf();
        let mut known = HashMap::new();

        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let mut parts = line.splitn(4, ' ');
                let (Some(host), Some(fingerprint), Some(expiry)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(TlsError::InvalidConfig(format!(
                        "Bad trust store line: {}",
                        line
                    )));
                };

                let not_after = match expiry {
                    "-" => None,
                    secs => {
                        let secs = secs.parse::<i64>().map_err(|_| {
                            TlsError::InvalidConfig(format!("Bad expiry in trust store: {}", secs))
                        })?;
                        DateTime::from_timestamp(secs, 0)
                    }
                };

                known.insert(
                    host.to_ascii_lowercase(),
                    Known {
                        fingerprint: fingerprint.to_string(),
                        subject: parts.next().unwrap_or("").to_string(),
                        not_after,
                    },
                );
            }
            log::debug!("loaded {} trusted identities from {}", known.len(), path.display());
        }

        Ok(TofuTrustStore {
            known: Mutex::new(known),
            path: Some(path),
            trust_first: true,
        })
    }

    /// Whether a host with no record is trusted (and remembered) on sight
    pub fn trust_first_use(mut self, trust: bool) -> Self {
        self.trust_first = trust;
        self
    }

    /// Record `identity` as the trusted one for `hostname`
    pub fn add(&self, hostname: &str, identity: &PeerIdentity) -> Result<(), TlsError> {
        self.with_known(|known| {
            known.insert(hostname.to_ascii_lowercase(), Known::from(identity));
        });
        self.save()
    }

    /// Forget whatever is known for `hostname`
    pub fn remove(&self, hostname: &str) -> Result<(), TlsError> {
        self.with_known(|known| {
            known.remove(&hostname.to_ascii_lowercase());
        });
        self.save()
    }

    /// Number of hosts with a recorded identity
    pub fn len(&self) -> usize {
        self.with_known(|known| known.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the store to its backing file, if it has one
    pub fn save(&self) -> Result<(), TlsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut lines: Vec<String> = self.with_known(|known| {
            known
                .iter()
                .map(|(host, k)| {
                    let expiry = k
                        .not_after
                        .map(|t| t.timestamp().to_string())
                        .unwrap_or_else(|| "-".to_string());
                    format!("{} {} {} {}", host, k.fingerprint, expiry, k.subject)
                })
                .collect()
        });
        lines.sort();

        let mut file = fs::File::create(path)?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    fn with_known<R>(&self, f: impl FnOnce(&mut HashMap<String, Known>) -> R) -> R {
        let mut guard = match self.known.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for TofuTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore for TofuTrustStore {
    fn evaluate(&self, identity: &PeerIdentity, hostname: &str) -> TrustResult {
        if identity.is_expired(Utc::now()) {
            return TrustResult::Expired;
        }

        let host = hostname.to_ascii_lowercase();
        let (result, changed) = self.with_known(|known| match known.get(&host) {
            None if self.trust_first => {
                known.insert(host.clone(), Known::from(identity));
                (TrustResult::Trusted, true)
            }
            None => (TrustResult::Unknown, false),
            Some(k) if k.fingerprint == identity.fingerprint => (TrustResult::Trusted, false),
            Some(k) => {
                let newer = match (k.not_after, identity.not_after) {
                    (Some(old), Some(new)) => new > old,
                    _ => false,
                };
                if newer && k.subject == identity.subject && identity.matches_host(&host) {
                    known.insert(host.clone(), Known::from(identity));
                    (TrustResult::Renewed, true)
                } else {
                    (TrustResult::Changed, false)
                }
            }
        });

        if changed {
            if let Err(e) = self.save() {
                log::warn!("failed to save trust store: {}", e);
            }
        }

        log::debug!("trust evaluation for {}: {:?}", hostname, result);
        result
    }
}
