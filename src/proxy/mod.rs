//! Proxy module for verifying candidate proxies
//!
//! This module provides functionality for:
//! - Reading candidates from newline-delimited lists
//! - Validating proxy judges and discovering the public IP
//! - Classifying a proxy's protocols, anonymity and latency
//! - Scheduling verification with bounded concurrency and resumable interruption
//! - Saving verified proxies to per-protocol files

pub mod checker;
pub mod geo;
pub mod judge;
pub mod models;
pub mod parser;
pub mod probe;
pub mod scheduler;
pub mod sink;

pub use checker::{classify_anonymity, CheckerConfig, ProxyChecker};
pub use judge::{JudgeConfig, JudgePool, StartupError};
pub use models::{Anonymity, Candidate, CheckResult, Protocol};
pub use parser::{CandidateParser, CandidateSource};
pub use scheduler::{ResumeInfo, ScanReport, Scheduler, SchedulerConfig, Verifier};
pub use sink::{FileSink, FlushKind, ResultAccumulator, ResultSink, SinkConfig};
