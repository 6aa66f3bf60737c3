//! Verified-proxy sets and where they get written

use crate::proxy::models::{Candidate, CheckResult, Protocol};
use chrono::Local;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the set holding every verified candidate
pub const ALL_SET: &str = "all";

const DEFAULT_OUTPUT_BASE: &str = "working-proxies";

/// Per-protocol result sets plus "all".
///
/// Owned and mutated by the scheduler loop only; sets are ordered so output
/// files come out sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultAccumulator {
    all: BTreeSet<Candidate>,
    by_protocol: BTreeMap<Protocol, BTreeSet<Candidate>>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result to "all" and to each protocol it supports.
    /// Returns whether "all" grew.
    pub fn merge(&mut self, result: &CheckResult) -> bool {
        for protocol in &result.protocols {
            self.by_protocol
                .entry(*protocol)
                .or_default()
                .insert(result.candidate.clone());
        }
        self.all.insert(result.candidate.clone())
    }

    pub fn all(&self) -> &BTreeSet<Candidate> {
        &self.all
    }

    pub fn protocol(&self, protocol: Protocol) -> Option<&BTreeSet<Candidate>> {
        self.by_protocol.get(&protocol)
    }

    pub fn count(&self, protocol: Protocol) -> usize {
        self.protocol(protocol).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Non-empty sets as `(name, protocol, members)`, "all" first
    pub fn sets(&self) -> impl Iterator<Item = (&'static str, Option<Protocol>, &BTreeSet<Candidate>)> {
        let all = (!self.all.is_empty()).then_some((ALL_SET, None, &self.all));
        let protocols = self
            .by_protocol
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(protocol, set)| (protocol.as_str(), Some(*protocol), set));
        all.into_iter().chain(protocols)
    }
}

/// Why the sink is being flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Interim snapshot during a run
    Checkpoint,
    /// End of run, normal or interrupted
    Final,
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

/// Persists accumulated results. Failures are reported, never raised.
pub trait ResultSink {
    fn flush(&mut self, results: &ResultAccumulator, kind: FlushKind) -> FlushReport;
}

/// Configuration for the file sink
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Path prefix; sets land at `<base>-<set>.txt`
    pub base: PathBuf,
    /// Write `<protocol>://` in front of lines of protocol files
    pub prepend_protocol: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from(DEFAULT_OUTPUT_BASE),
            prepend_protocol: false,
        }
    }
}

impl SinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: PathBuf) -> Self {
        self.base = base;
        self
    }

    pub fn with_prepend_protocol(mut self, prepend: bool) -> Self {
        self.prepend_protocol = prepend;
        self
    }
}

/// Writes one newline-delimited file per non-empty set
#[derive(Debug, Clone)]
pub struct FileSink {
    config: SinkConfig,
}

impl FileSink {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    /// File a set is written to
    pub fn path_for(&self, set: &str) -> PathBuf {
        let mut name = self
            .config
            .base
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_OUTPUT_BASE.into());
        name.push(format!("-{set}.txt"));
        self.config.base.with_file_name(name)
    }

    fn write_set(
        &self,
        path: &Path,
        protocol: Option<Protocol>,
        members: &BTreeSet<Candidate>,
    ) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let prefix = match protocol {
            Some(protocol) if self.config.prepend_protocol => format!("{protocol}://"),
            _ => String::new(),
        };

        let mut content = String::new();
        for candidate in members {
            content.push_str(&prefix);
            content.push_str(candidate.as_str());
            content.push('\n');
        }

        fs::write(path, content)
    }
}

impl ResultSink for FileSink {
    fn flush(&mut self, results: &ResultAccumulator, kind: FlushKind) -> FlushReport {
        let mut report = FlushReport::default();

        for (set, protocol, members) in results.sets() {
            let path = self.path_for(set);
            match self.write_set(&path, protocol, members) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "could not write output file");
                    report.failed += 1;
                }
            }
        }

        if kind == FlushKind::Checkpoint {
            tracing::info!(total = results.len(), files = report.written, "interim save complete");
        }

        report
    }
}

/// Default resume-file location: `<stem>-unchecked.txt` beside the input,
/// or a timestamped name in the working directory.
pub fn resume_path_for(input: Option<&Path>) -> PathBuf {
    match input.and_then(|p| p.file_stem().map(|stem| (p, stem))) {
        Some((input, stem)) => {
            let mut name = stem.to_os_string();
            name.push("-unchecked.txt");
            input.with_file_name(name)
        }
        None => PathBuf::from(format!("unchecked-{}.txt", Local::now().format("%Y%m%d-%H%M%S"))),
    }
}

/// Stream candidates into a resume file, one per line. Returns the count.
pub fn write_resume_file<I>(path: &Path, candidates: I) -> io::Result<usize>
where
    I: IntoIterator<Item = Candidate>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut count = 0;
    for candidate in candidates {
        writeln!(writer, "{candidate}")?;
        count += 1;
    }
    writer.flush()?;

    Ok(count)
}
