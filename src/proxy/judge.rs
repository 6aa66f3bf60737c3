//! Judge pool: header-echo endpoints the verifier probes through each proxy,
//! plus this process's own public IP.
//!
//! The pool is built once at startup and is read-only afterwards, so it is
//! shared across verification tasks behind an `Arc` without locking.

use crate::proxy::probe::{self, Probe, DEFAULT_USER_AGENT};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Timeout for the direct startup requests
const DEFAULT_JUDGE_TIMEOUT_SECS: u64 = 5;

/// Text a judge must echo to prove it reports connection metadata
const DEFAULT_JUDGE_MARKER: &str = "REMOTE_ADDR";

const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org/";

const DEFAULT_JUDGES: &[&str] = &[
    "http://proxyjudge.us/azenv.php",
    "http://mojeip.net.pl/asdfa/azenv.php",
    "http://azenv.net/",
    "http://www.proxy-listen.de/azenv.php",
    "http://httpheader.net/azenv.php",
    "http://pascal.hoez.hu/proxy.php",
    "https://www.proxyjudge.info/azenv.php",
    "http://proxy.web-hosting.com/azenv.php",
];

/// Conditions that stop a run before any candidate is scheduled
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no proxy judge passed the content check")]
    NoLiveJudges,
    #[error("could not determine the public IP address")]
    PublicIpUnavailable,
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Configuration for judge validation
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Candidate judge URLs, validated in parallel
    pub judges: Vec<String>,
    /// Substring a judge body must contain
    pub marker: String,
    /// Endpoint returning our public IP as plain text
    pub ip_echo_url: String,
    /// Timeout for each direct startup request
    pub timeout: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            judges: DEFAULT_JUDGES.iter().map(|s| s.to_string()).collect(),
            marker: DEFAULT_JUDGE_MARKER.to_string(),
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_JUDGE_TIMEOUT_SECS),
        }
    }
}

impl JudgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judges(mut self, judges: Vec<String>) -> Self {
        self.judges = judges;
        self
    }

    pub fn with_ip_echo_url(mut self, url: String) -> Self {
        self.ip_echo_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Live judges and the public IP they are compared against
#[derive(Debug, Clone)]
pub struct JudgePool {
    judges: Vec<String>,
    public_ip: String,
}

impl JudgePool {
    /// Validate every configured judge and discover the public IP.
    ///
    /// Fails if no judge passes or the IP cannot be determined; either one
    /// makes anonymity classification meaningless.
    pub async fn initialize(config: &JudgeConfig) -> Result<Self, StartupError> {
        let client = probe::build_client(None, config.timeout, DEFAULT_USER_AGENT)?;

        tracing::info!(count = config.judges.len(), "checking proxy judges");

        let checks = config.judges.iter().map(|judge| {
            let client = &client;
            async move {
                let probe = probe::send_query(client, judge).await;
                (judge, probe)
            }
        });

        let mut judges = Vec::new();
        for (judge, probe) in join_all(checks).await {
            match probe {
                Probe::Ok { body, .. } if body.contains(&config.marker) => {
                    tracing::info!(judge = %judge, "judge is valid");
                    judges.push(judge.clone());
                }
                Probe::Ok { .. } => {
                    tracing::warn!(judge = %judge, "judge returned invalid content");
                }
                Probe::Status(status) => {
                    tracing::warn!(judge = %judge, %status, "judge returned an error status");
                }
                Probe::Unreachable => {
                    tracing::warn!(judge = %judge, "judge is unreachable");
                }
            }
        }

        if judges.is_empty() {
            return Err(StartupError::NoLiveJudges);
        }
        tracing::info!(count = judges.len(), "using valid proxy judges");

        let public_ip = match probe::send_query(&client, &config.ip_echo_url).await {
            Probe::Ok { body, .. } if !body.trim().is_empty() => body.trim().to_string(),
            _ => return Err(StartupError::PublicIpUnavailable),
        };
        tracing::info!(%public_ip, "discovered public IP");

        Ok(Self { judges, public_ip })
    }

    /// Build a pool from judges that were validated elsewhere
    pub fn from_parts(judges: Vec<String>, public_ip: impl Into<String>) -> Self {
        Self {
            judges,
            public_ip: public_ip.into(),
        }
    }

    pub fn judges(&self) -> &[String] {
        &self.judges
    }

    pub fn public_ip(&self) -> &str {
        &self.public_ip
    }

    /// Uniform draw over the live judges; callers re-draw on every attempt
    pub fn random_judge(&self) -> Option<&str> {
        self.judges
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}
