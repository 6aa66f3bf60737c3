mod support;

use std::sync::Arc;
use std::time::Duration;

use proxy_sieve::proxy::{Anonymity, Candidate, CheckerConfig, JudgePool, Protocol, ProxyChecker};
use support::{closed_addr, MockServer};

const PUBLIC_IP: &str = "203.0.113.77";
const ELITE_ECHO: &str = "REMOTE_ADDR = 127.0.0.1\nREMOTE_PORT = 50123\nHTTP_HOST = judge.test\n";

fn checker_for(server: &MockServer) -> ProxyChecker {
    let judges = Arc::new(JudgePool::from_parts(vec![server.url("/judge")], PUBLIC_IP));
    let config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(3))
        .with_liveness(server.url("/liveness"), "Firefox".to_string())
        .with_retry_delay(Duration::from_millis(10));
    ProxyChecker::with_config(config, judges)
}

#[tokio::test]
async fn http_and_socks5_proxy_is_classified_elite() {
    let server = MockServer::builder()
        .socks5(true)
        .route("/liveness", 200, "<title>Firefox Add-ons</title>")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;
    let checker = checker_for(&server);

    let result = checker
        .check_proxy(&Candidate::new(server.candidate()))
        .await
        .expect("proxy should verify");

    let expected: std::collections::BTreeSet<_> = [Protocol::Http, Protocol::Socks5].into_iter().collect();
    assert_eq!(result.protocols, expected);
    assert!(!result.supports(Protocol::Socks4));
    assert_eq!(result.anonymity, Anonymity::Elite);
    assert_eq!(result.candidate.as_str(), server.candidate());
    assert!(result.country.is_none());
    assert!(result.remote_address.is_none());

    // Liveness stops at http; each working protocol hits one judge once
    assert_eq!(server.hits("/liveness"), 1);
    assert_eq!(server.hits("/judge"), 2);
}

#[tokio::test]
async fn socks4_only_proxy_is_verified_over_socks4() {
    let server = MockServer::builder()
        .http_proxy(false)
        .socks4(true)
        .route("/liveness", 200, "Firefox")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await
        .expect("proxy should verify");

    let expected: std::collections::BTreeSet<_> = [Protocol::Socks4].into_iter().collect();
    assert_eq!(result.protocols, expected);
    assert_eq!(result.anonymity, Anonymity::Elite);
    // http was refused, so liveness succeeded on the socks4 attempt
    assert_eq!(server.hits("/liveness"), 1);
    assert_eq!(server.hits("/judge"), 1);
}

#[tokio::test]
async fn own_ip_in_echo_is_transparent() {
    let echo = format!("REMOTE_ADDR = {PUBLIC_IP}\nHTTP_VIA = 1.1 squid\n");
    let server = MockServer::builder()
        .route("/liveness", 200, "Firefox")
        .route("/judge", 200, &echo)
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await
        .expect("proxy should verify");

    assert_eq!(result.anonymity, Anonymity::Transparent);
    assert_eq!(result.protocols.len(), 1);
    assert!(result.supports(Protocol::Http));
}

#[tokio::test]
async fn proxy_headers_without_own_ip_are_anonymous() {
    let server = MockServer::builder()
        .route("/liveness", 200, "Firefox")
        .route("/judge", 200, "REMOTE_ADDR = 127.0.0.1\nHTTP_X_FORWARDED_FOR = 10.1.1.1\n")
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await
        .expect("proxy should verify");

    assert_eq!(result.anonymity, Anonymity::Anonymous);
}

#[tokio::test]
async fn remote_address_is_captured_when_enabled() {
    let server = MockServer::builder()
        .route("/liveness", 200, "Firefox")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;
    let judges = Arc::new(JudgePool::from_parts(vec![server.url("/judge")], PUBLIC_IP));
    let config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(3))
        .with_liveness(server.url("/liveness"), "Firefox".to_string())
        .with_remote_address(true);
    let checker = ProxyChecker::with_config(config, judges);

    let result = checker
        .check_proxy(&Candidate::new(server.candidate()))
        .await
        .expect("proxy should verify");

    assert_eq!(result.remote_address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn dead_candidate_is_dropped_every_time() {
    let server = MockServer::builder()
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;
    let checker = checker_for(&server);
    let dead = Candidate::new(closed_addr().to_string());

    assert!(checker.check_proxy(&dead).await.is_none());
    assert!(checker.check_proxy(&dead).await.is_none());
    assert_eq!(server.hits("/judge"), 0);
}

#[tokio::test]
async fn altered_liveness_page_is_rejected_as_hijacked() {
    let server = MockServer::builder()
        .socks5(true)
        .route("/liveness", 200, "Welcome to the captive portal")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await;

    assert!(result.is_none());
    // Rejected on the first protocol, socks5 never tried
    assert_eq!(server.hits("/liveness"), 1);
    assert_eq!(server.hits("/judge"), 0);
}

#[tokio::test]
async fn auth_required_at_liveness_is_rejected() {
    let server = MockServer::builder()
        .route("/liveness", 407, "Proxy Authentication Required")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await;

    assert!(result.is_none());
    assert_eq!(server.hits("/judge"), 0);
}

#[tokio::test]
async fn non_200_liveness_is_dead() {
    let server = MockServer::builder()
        .route("/liveness", 502, "Bad Gateway")
        .route("/judge", 200, ELITE_ECHO)
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await;

    assert!(result.is_none());
    assert_eq!(server.hits("/judge"), 0);
}

#[tokio::test]
async fn judge_errors_are_retried_up_to_the_budget() {
    let server = MockServer::builder()
        .route("/liveness", 200, "Firefox")
        .route("/judge", 503, "Service Unavailable")
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await;

    // Live, but no judge ever answered: still dropped
    assert!(result.is_none());
    assert_eq!(server.hits("/judge"), 3);
}

#[tokio::test]
async fn judge_auth_required_stops_retries() {
    let server = MockServer::builder()
        .route("/liveness", 200, "Firefox")
        .route("/judge", 407, "Proxy Authentication Required")
        .start()
        .await;

    let result = checker_for(&server)
        .check_proxy(&Candidate::new(server.candidate()))
        .await;

    assert!(result.is_none());
    assert_eq!(server.hits("/judge"), 1);
}
