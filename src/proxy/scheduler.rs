//! Bounded-concurrency scheduler driving verification over a candidate stream.
//!
//! Candidates are pulled lazily and submitted as tasks while the in-flight
//! window has room (`2 × workers`); a semaphore keeps at most `workers`
//! verifications actually running. Results are merged on the scheduler loop
//! only, so the accumulator and the window need no locking.
//!
//! On cancellation the loop stops submitting, aborts every in-flight task
//! without awaiting it, and writes the unconfirmed and unread candidates to a
//! resume file.

use crate::proxy::models::{Candidate, CheckResult, Protocol};
use crate::proxy::sink::{self, FlushKind, ResultAccumulator, ResultSink};
use crate::Result;
use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent verifications
const DEFAULT_WORKERS: usize = 100;

/// Upper bound on `workers`; each one may hold three sockets open
pub const MAX_WORKERS: usize = 10_000;

/// Checkpoint every time "all" reaches a multiple of this
const DEFAULT_BATCH_SIZE: usize = 25;

const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;

/// Classifies one candidate; `None` means drop it
pub trait Verifier: Send + Sync + 'static {
    fn verify(&self, candidate: Candidate) -> impl Future<Output = Option<CheckResult>> + Send;
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Verifications running at once
    pub workers: usize,
    /// Checkpoint granularity
    pub batch_size: usize,
    /// How often to log progress while waiting
    pub progress_interval: Duration,
    /// Where to write the resume file; timestamped name when unset
    pub resume_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
            resume_path: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_resume_path(mut self, path: PathBuf) -> Self {
        self.resume_path = Some(path);
        self
    }

    /// Upper bound on submitted-but-unconfirmed tasks
    pub fn window_cap(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS) * 2
    }
}

/// Resume file written on interruption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub path: PathBuf,
    pub count: usize,
}

/// What a run did
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub submitted: usize,
    pub verified: usize,
    pub failed: usize,
    /// Tasks that panicked or were otherwise lost at the join boundary
    pub errored: usize,
    /// Largest in-flight window observed
    pub peak_in_flight: usize,
    pub checkpoints: usize,
    pub results: ResultAccumulator,
    /// Set when the run was interrupted
    pub resume: Option<ResumeInfo>,
}

impl ScanReport {
    pub fn interrupted(&self) -> bool {
        self.resume.is_some()
    }
}

struct InFlight {
    candidate: Candidate,
    abort: AbortHandle,
}

/// Drives a [`Verifier`] over a candidate stream
pub struct Scheduler<V, S> {
    config: SchedulerConfig,
    verifier: Arc<V>,
    sink: S,
    semaphore: Arc<Semaphore>,
}

impl<V: Verifier, S: ResultSink> Scheduler<V, S> {
    pub fn new(config: SchedulerConfig, verifier: Arc<V>, sink: S) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.clamp(1, MAX_WORKERS)));
        Self {
            config,
            verifier,
            sink,
            semaphore,
        }
    }

    /// Verify every candidate from `source`, or until `shutdown` fires.
    ///
    /// Only a failed resume-file write is an error; per-candidate failures
    /// and sink failures are logged and counted.
    pub async fn run<I>(mut self, source: I, shutdown: CancellationToken) -> Result<ScanReport>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut source = source.into_iter();
        let mut report = ScanReport::default();
        let mut window: BTreeMap<u64, InFlight> = BTreeMap::new();
        let mut pending = FuturesUnordered::new();
        let mut next_id = 0u64;
        let mut exhausted = false;
        let cap = self.config.window_cap();

        let mut ticker =
            tokio::time::interval(self.config.progress_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tracing::info!(workers = self.config.workers, window = cap, "starting verification");

        loop {
            while !exhausted && window.len() < cap && !shutdown.is_cancelled() {
                let Some(candidate) = source.next() else {
                    exhausted = true;
                    break;
                };
                let id = next_id;
                next_id += 1;
                let (abort, task) = self.submit(id, candidate.clone());
                window.insert(id, InFlight { candidate, abort });
                pending.push(task);
                report.submitted += 1;
            }
            report.peak_in_flight = report.peak_in_flight.max(window.len());

            if shutdown.is_cancelled() {
                return self.interrupt(report, window, source);
            }
            if window.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return self.interrupt(report, window, source);
                }
                Some((id, outcome)) = pending.next() => {
                    if let Some(done) = window.remove(&id) {
                        self.complete(&mut report, done.candidate, outcome);
                    }
                }
                _ = ticker.tick() => {
                    tracing::info!(
                        submitted = report.submitted,
                        verified = report.results.len(),
                        failed = report.failed,
                        in_flight = window.len(),
                        "still checking"
                    );
                }
            }
        }

        self.sink.flush(&report.results, FlushKind::Final);
        tracing::info!(
            submitted = report.submitted,
            verified = report.results.len(),
            "candidate source exhausted, all checks finished"
        );

        Ok(report)
    }

    /// Spawn one verification; the returned future resolves with its id
    fn submit(
        &self,
        id: u64,
        candidate: Candidate,
    ) -> (
        AbortHandle,
        impl Future<Output = (u64, std::result::Result<Option<CheckResult>, JoinError>)>,
    ) {
        let verifier = Arc::clone(&self.verifier);
        let semaphore = Arc::clone(&self.semaphore);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };
            verifier.verify(candidate).await
        });

        (handle.abort_handle(), handle.map(move |outcome| (id, outcome)))
    }

    fn complete(
        &mut self,
        report: &mut ScanReport,
        candidate: Candidate,
        outcome: std::result::Result<Option<CheckResult>, JoinError>,
    ) {
        match outcome {
            Ok(Some(result)) => {
                report.verified += 1;
                let grew = report.results.merge(&result);

                tracing::info!(
                    proxy = %result.candidate,
                    anonymity = %result.anonymity,
                    protocols = %result.protocol_list(),
                    latency_ms = result.latency_ms,
                    country = result.country.as_deref().unwrap_or("-"),
                    "proxy verified"
                );

                if grew && report.results.len() % self.config.batch_size == 0 {
                    self.sink.flush(&report.results, FlushKind::Checkpoint);
                    report.checkpoints += 1;
                }
            }
            Ok(None) => {
                report.failed += 1;
                tracing::trace!(proxy = %candidate, "proxy rejected");
            }
            Err(e) => {
                report.errored += 1;
                tracing::error!(proxy = %candidate, error = %e, "verification task failed");
            }
        }
    }

    fn interrupt<I>(
        mut self,
        mut report: ScanReport,
        window: BTreeMap<u64, InFlight>,
        source: I,
    ) -> Result<ScanReport>
    where
        I: Iterator<Item = Candidate>,
    {
        tracing::warn!(in_flight = window.len(), "interrupted, abandoning in-flight checks");

        let unconfirmed: Vec<Candidate> = window
            .into_values()
            .map(|in_flight| {
                in_flight.abort.abort();
                in_flight.candidate
            })
            .collect();

        let path = self
            .config
            .resume_path
            .clone()
            .unwrap_or_else(|| sink::resume_path_for(None));
        let count = sink::write_resume_file(&path, unconfirmed.into_iter().chain(source))
            .with_context(|| format!("failed to write resume file {}", path.display()))?;

        tracing::warn!(path = %path.display(), count, "wrote unchecked candidates to resume file");

        self.sink.flush(&report.results, FlushKind::Final);
        report.resume = Some(ResumeInfo { path, count });

        Ok(report)
    }
}

/// Totals per set, "all" first, for summaries
pub fn totals(results: &ResultAccumulator) -> Vec<(&'static str, usize)> {
    std::iter::once((sink::ALL_SET, results.len()))
        .chain(Protocol::ALL.iter().map(|p| (p.as_str(), results.count(*p))))
        .collect()
}
