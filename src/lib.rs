//! Proxy Sieve - judge-based proxy verifier
//!
//! Verifies large lists of candidate proxies for liveness, supported
//! protocols (HTTP/SOCKS4/SOCKS5), anonymity and latency at high concurrency.
//! Interrupted runs leave a resume file so no candidate is lost.

pub mod logging;
pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
