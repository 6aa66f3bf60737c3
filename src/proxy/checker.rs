//! Proxy checker: liveness, supported protocols, anonymity and latency for
//! one candidate at a time.

use crate::proxy::geo::GeoLocator;
use crate::proxy::judge::JudgePool;
use crate::proxy::models::{Anonymity, Candidate, CheckResult, Protocol};
use crate::proxy::probe::{self, Probe, DEFAULT_USER_AGENT};
use crate::proxy::scheduler::Verifier;
use futures::future::join_all;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for each proxied request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Judge attempts per protocol
const DEFAULT_RETRY_ATTEMPTS: usize = 3;

const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Liveness target, deliberately not a judge. Google flags abused proxies,
/// Mozilla mostly doesn't.
const DEFAULT_LIVENESS_URL: &str = "https://addons.mozilla.org/en-US/firefox/";
const DEFAULT_LIVENESS_MARKER: &str = "Firefox";

/// Header names whose presence in a judge echo means the proxy announced itself.
/// Matched as plain, case-sensitive substrings of the raw echo.
pub const PRIVACY_HEADERS: &[&str] = &[
    "VIA",
    "X-FORWARDED-FOR",
    "X-FORWARDED",
    "FORWARDED-FOR",
    "FORWARDED-FOR-IP",
    "FORWARDED",
    "CLIENT-IP",
    "PROXY-CONNECTION",
];

static REMOTE_ADDR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"REMOTE_ADDR\s*=\s*([0-9A-Fa-f:.]*[0-9A-Fa-f])").expect("Invalid REMOTE_ADDR regex")
});

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each proxied request
    pub timeout: Duration,
    /// URL fetched through the proxy to decide liveness
    pub liveness_url: String,
    /// Substring the liveness page must contain
    pub liveness_marker: String,
    /// Judge attempts per protocol
    pub retry_attempts: usize,
    /// Pause between judge attempts
    pub retry_delay: Duration,
    pub user_agent: String,
    /// Path to MMDB file for country lookup (optional)
    pub mmdb_path: Option<String>,
    /// Extract `REMOTE_ADDR` from the judge echo
    pub capture_remote_address: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            liveness_url: DEFAULT_LIVENESS_URL.to_string(),
            liveness_marker: DEFAULT_LIVENESS_MARKER.to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mmdb_path: None,
            capture_remote_address: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_liveness(mut self, url: String, marker: String) -> Self {
        self.liveness_url = url;
        self.liveness_marker = marker;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    pub fn with_remote_address(mut self, capture: bool) -> Self {
        self.capture_remote_address = capture;
        self
    }
}

/// Outcome of the liveness stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Live(Protocol),
    /// Answered 200 without the marker: something rewrote the page
    Hijacked(Protocol),
    AuthRequired(Protocol),
    Dead,
}

/// A judge that answered through one protocol
#[derive(Debug, Clone)]
struct JudgeAnswer {
    protocol: Protocol,
    body: String,
    elapsed_ms: u64,
}

/// Proxy checker for classifying candidates
#[derive(Debug, Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    judges: Arc<JudgePool>,
    geo_locator: Option<GeoLocator>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new(judges: Arc<JudgePool>) -> Self {
        Self::with_config(CheckerConfig::default(), judges)
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig, judges: Arc<JudgePool>) -> Self {
        let geo_locator = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| tracing::warn!(path = %path, error = %e, "geo database unavailable"))
                .ok()
        });

        Self {
            config,
            judges,
            geo_locator,
        }
    }

    /// Classify a single candidate.
    ///
    /// `None` means "drop it": dead, hijacked, auth-walled, or no judge ever
    /// answered through it. It is never an error.
    pub async fn check_proxy(&self, candidate: &Candidate) -> Option<CheckResult> {
        let clients = self.create_clients(candidate);

        match self.check_liveness(candidate, &clients).await {
            Liveness::Live(protocol) => {
                tracing::trace!(proxy = %candidate, %protocol, "liveness passed");
            }
            Liveness::Hijacked(protocol) => {
                tracing::debug!(proxy = %candidate, %protocol, "liveness page altered, possible hijack");
                return None;
            }
            Liveness::AuthRequired(protocol) => {
                tracing::debug!(proxy = %candidate, %protocol, "proxy requires a password");
                return None;
            }
            Liveness::Dead => {
                tracing::debug!(proxy = %candidate, "proxy is dead");
                return None;
            }
        }

        let probes = clients
            .iter()
            .map(|(protocol, client)| self.query_judges(candidate, *protocol, client.as_ref()));
        let answers: Vec<JudgeAnswer> = join_all(probes).await.into_iter().flatten().collect();

        if answers.is_empty() {
            tracing::debug!(proxy = %candidate, "live, but no judge answered through any protocol");
            return None;
        }

        let chosen = answers.choose(&mut rand::thread_rng())?;
        let anonymity = classify_anonymity(&chosen.body, self.judges.public_ip());
        let remote_address = if self.config.capture_remote_address {
            extract_remote_address(&chosen.body)
        } else {
            None
        };

        let protocols: BTreeSet<Protocol> = answers.iter().map(|a| a.protocol).collect();
        let latency_ms = answers.iter().map(|a| a.elapsed_ms).sum::<u64>() / answers.len() as u64;
        let country = self
            .geo_locator
            .as_ref()
            .and_then(|geo| geo.country_code(candidate.host()));

        Some(CheckResult {
            candidate: candidate.clone(),
            protocols,
            anonymity,
            latency_ms,
            country,
            remote_address,
        })
    }

    /// Try each protocol in order against the liveness URL, stopping at the
    /// first that serves the expected page.
    async fn check_liveness(
        &self,
        candidate: &Candidate,
        clients: &[(Protocol, Option<Client>)],
    ) -> Liveness {
        for (protocol, client) in clients {
            let Some(client) = client else { continue };

            match probe::send_query(client, &self.config.liveness_url).await {
                Probe::Ok { body, .. } => {
                    if body.contains(&self.config.liveness_marker) {
                        return Liveness::Live(*protocol);
                    }
                    return Liveness::Hijacked(*protocol);
                }
                Probe::Status(StatusCode::PROXY_AUTHENTICATION_REQUIRED) => {
                    return Liveness::AuthRequired(*protocol);
                }
                Probe::Status(status) => {
                    tracing::trace!(proxy = %candidate, %protocol, %status, "liveness status");
                }
                Probe::Unreachable => {}
            }
        }

        Liveness::Dead
    }

    /// Probe random judges through one protocol until one answers or the
    /// retry budget runs out.
    async fn query_judges(
        &self,
        candidate: &Candidate,
        protocol: Protocol,
        client: Option<&Client>,
    ) -> Option<JudgeAnswer> {
        let client = client?;

        for attempt in 1..=self.config.retry_attempts {
            let judge = self.judges.random_judge()?.to_string();

            match probe::send_query(client, &judge).await {
                Probe::Ok { body, elapsed_ms } => {
                    return Some(JudgeAnswer {
                        protocol,
                        body,
                        elapsed_ms,
                    });
                }
                Probe::Unreachable => return None,
                Probe::Status(StatusCode::PROXY_AUTHENTICATION_REQUIRED) => {
                    tracing::debug!(proxy = %candidate, %protocol, "proxy requires a password");
                    return None;
                }
                Probe::Status(status) if attempt == self.config.retry_attempts => {
                    if status == StatusCode::NOT_FOUND {
                        tracing::debug!(proxy = %candidate, %protocol, %judge, "judge returned 404, may be a hijacking proxy");
                    } else {
                        tracing::debug!(proxy = %candidate, %protocol, %status, "judge failed all retries");
                    }
                }
                Probe::Status(_) => tokio::time::sleep(self.config.retry_delay).await,
            }
        }

        None
    }

    /// One client per protocol; `None` where the proxy URL is unusable
    fn create_clients(&self, candidate: &Candidate) -> Vec<(Protocol, Option<Client>)> {
        Protocol::ALL
            .into_iter()
            .map(|protocol| {
                let proxy_url = candidate.proxy_url(protocol);
                let client = probe::build_client(
                    Some(&proxy_url),
                    self.config.timeout,
                    &self.config.user_agent,
                )
                .map_err(|e| {
                    tracing::trace!(proxy = %candidate, %protocol, error = %e, "cannot build client")
                })
                .ok();
                (protocol, client)
            })
            .collect()
    }
}

impl Verifier for ProxyChecker {
    fn verify(&self, candidate: Candidate) -> impl Future<Output = Option<CheckResult>> + Send {
        async move { self.check_proxy(&candidate).await }
    }
}

/// Classify a raw judge echo.
///
/// Our own IP anywhere in the echo wins over any header match.
pub fn classify_anonymity(body: &str, public_ip: &str) -> Anonymity {
    if !public_ip.is_empty() && body.contains(public_ip) {
        return Anonymity::Transparent;
    }
    if PRIVACY_HEADERS.iter().any(|header| body.contains(header)) {
        return Anonymity::Anonymous;
    }
    Anonymity::Elite
}

/// The `REMOTE_ADDR = ...` value of an azenv-style echo
pub fn extract_remote_address(body: &str) -> Option<String> {
    REMOTE_ADDR_REGEX
        .captures(body)
        .map(|caps| caps[1].to_string())
}
