use chrono::Utc;
use indicatif::ProgressStyle;
use owo_colors::OwoColorize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::{BatchSummary, ObjectFailure};

/// Style for the per-page progress bar.
pub fn page_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:>16} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Print the end-of-batch summary. Colors only when stdout is a terminal.
pub fn print_summary(summary: &BatchSummary) {
    let line = summary.summary_line();
    if !std::io::stdout().is_terminal() {
        println!("{}", line);
        return;
    }
    if summary.errors.is_empty() {
        println!("{}", line.green());
    } else {
        println!("{}", line.yellow());
        for f in summary.errors.iter().take(10) {
            println!("  {} {}", f.key.red(), f.message);
        }
        if summary.errors.len() > 10 {
            println!("  ... and {} more", summary.errors.len() - 10);
        }
    }
}

/// Write the failures of one batch as JSON Lines into `<state_dir>/logs/`.
/// Returns the path written, or `None` when there was nothing to write or
/// the log could not be written in full.
pub fn write_failures_jsonl(state_dir: &Path, failures: &[ObjectFailure]) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }
    let dir = state_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!("cannot create {}: {}", dir.display(), e);
        return None;
    }
    let path = dir.join(format!("failures_{}.jsonl", Utc::now().format("%Y%m%dT%H%M%SZ")));
    let f = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("cannot open {}: {}", path.display(), e);
            return None;
        }
    };
    if let Err(e) = write_jsonl(&mut BufWriter::new(f), failures) {
        tracing::warn!("failure log {} is incomplete: {}", path.display(), e);
        return None;
    }
    Some(path)
}

fn write_jsonl<W: Write>(w: &mut W, failures: &[ObjectFailure]) -> io::Result<()> {
    for failure in failures {
        let line = serde_json::to_string(failure).map_err(io::Error::other)?;
        writeln!(w, "{}", line)?;
    }
    w.flush()
}

/// How often a unit of work is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self { max_attempts: 1, backoff: Duration::ZERO }
    }

    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Generic retry helper used by workers and tests.
/// Waits `backoff * attempt` between attempts (linear). Stops early when
/// `retriable` says the error is permanent; the last error is returned.
pub fn retry_operation<F, T, E>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    retriable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && retriable(&e) => {
                let wait = policy.backoff.saturating_mul(attempt as u32);
                tracing::debug!("{}: attempt {}/{} failed ({}), retrying in {:?}", label, attempt, max, e, wait);
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
