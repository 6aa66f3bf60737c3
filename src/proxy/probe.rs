//! Single HTTP probes, direct or through a proxy

use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::time::{Duration, Instant};

/// Browser user agent sent with every probe
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.93 Safari/537.36";

/// Outcome of one GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// HTTP 200 with its body and time until the response headers arrived
    Ok { body: String, elapsed_ms: u64 },
    /// Any other status
    Status(StatusCode),
    /// No HTTP response at all: refused, reset, timed out, TLS failure
    Unreachable,
}

/// Build a client for probing, optionally routed through `proxy_url`.
///
/// Certificate validation is off: far-side chains behind random proxies are
/// routinely broken and that says nothing about the proxy itself.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
    user_agent: &str,
) -> reqwest::Result<Client> {
    let builder = Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .danger_accept_invalid_certs(true);

    let builder = match proxy_url {
        Some(url) => builder.proxy(ReqwestProxy::all(url)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// GET `url` and classify the outcome
pub async fn send_query(client: &Client, url: &str) -> Probe {
    let start = Instant::now();

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::trace!(url, error = %e, "probe failed");
            return Probe::Unreachable;
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    if status != StatusCode::OK {
        return Probe::Status(status);
    }

    match response.text().await {
        Ok(body) => Probe::Ok { body, elapsed_ms },
        Err(e) => {
            tracing::trace!(url, error = %e, "probe body read failed");
            Probe::Unreachable
        }
    }
}
