//! Proxy data models

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Protocols a candidate is probed with, in probing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Socks4,
    Socks5,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Http, Protocol::Socks4, Protocol::Socks5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the client a proxy reveals to the far side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anonymity {
    /// Our own public IP reaches the judge
    Transparent,
    /// IP hidden, but proxy headers give the proxy away
    Anonymous,
    Elite,
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Transparent => write!(f, "Transparent"),
            Anonymity::Anonymous => write!(f, "Anonymous"),
            Anonymity::Elite => write!(f, "Elite"),
        }
    }
}

/// A not-yet-verified proxy address, `host:port` or `user:pass@host:port`.
///
/// The text is kept verbatim; it is what lands in output and resume files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Proxy URL for probing through the given protocol
    pub fn proxy_url(&self, protocol: Protocol) -> String {
        format!("{}://{}", protocol, self.0)
    }

    /// Host part, with any credentials and port stripped
    pub fn host(&self) -> &str {
        let addr = self.0.rsplit_once('@').map_or(self.0.as_str(), |(_, addr)| addr);
        if let Some(rest) = addr.strip_prefix('[') {
            // [v6]:port
            return rest.split_once(']').map_or(rest, |(host, _)| host);
        }
        addr.rsplit_once(':').map_or(addr, |(host, _)| host)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Candidate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Classification of one verified candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub candidate: Candidate,
    /// Never empty
    pub protocols: BTreeSet<Protocol>,
    pub anonymity: Anonymity,
    /// Average over the protocols that answered
    pub latency_ms: u64,
    /// ISO 3166-1 alpha-2 code, when a geo database is configured
    pub country: Option<String>,
    /// `REMOTE_ADDR` as seen by the judge, when captured
    pub remote_address: Option<String>,
}

impl CheckResult {
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// Protocols joined by commas, e.g. `http,socks5`
    pub fn protocol_list(&self) -> String {
        self.protocols
            .iter()
            .map(Protocol::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
