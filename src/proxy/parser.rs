//! Candidate parsing and streaming from newline-delimited files

use crate::proxy::judge::StartupError;
use crate::proxy::models::Candidate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// `scheme://[user:pass@]host:port[/]`
static URL_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?|socks[45]h?)://((?:[^:@/]+:[^@/]+@)?[^:/@]+:\d{1,5})/?$")
        .expect("Invalid URL format regex")
});

/// `host:port:user:pass`
static COLON_AUTH_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:@]+):(\d{1,5}):([^:@]+):([^@]+)$").expect("Invalid colon auth regex")
});

/// Candidate parser for the line formats proxy lists tend to use
pub struct CandidateParser;

impl CandidateParser {
    /// Parse a single line into a candidate
    ///
    /// Blank lines and `#` comments yield `None`. Supported formats are
    /// rewritten to `[user:pass@]host:port`:
    /// - IP:PORT
    /// - USER:PASS@IP:PORT
    /// - IP:PORT:USER:PASS
    /// - scheme://IP:PORT
    /// - scheme://USER:PASS@IP:PORT
    ///
    /// Anything else is passed through as-is.
    pub fn parse_line(line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        Some(Candidate::new(Self::normalize(line)))
    }

    /// Rewrite a trimmed, non-comment line to canonical candidate text
    pub fn normalize(line: &str) -> String {
        if let Some(caps) = URL_FORMAT.captures(line) {
            return caps[1].to_string();
        }

        if let Some(caps) = COLON_AUTH_FORMAT.captures(line) {
            return format!("{}:{}@{}:{}", &caps[3], &caps[4], &caps[1], &caps[2]);
        }

        line.to_string()
    }
}

/// Lazily streams candidates from a file, one line at a time.
///
/// Nothing is buffered beyond the reader, so a candidate not yet pulled is
/// still "unread" and can be written to a resume file as-is. Lines that are
/// not valid UTF-8 are decoded lossily rather than ending the stream.
pub struct CandidateSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl CandidateSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StartupError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|_| StartupError::MissingInput(path.clone()))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
        })
    }
}

impl Iterator for CandidateSource {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.buf);
                    if let Some(candidate) = CandidateParser::parse_line(&line) {
                        return Some(candidate);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "stopped reading candidates");
                    return None;
                }
            }
        }
    }
}
