// transfer module: batch orchestration over paginated listings
mod aggregate;
mod scheduler;
mod skip;
mod workers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::codec::Codec;
use crate::config::BackupMode;
use crate::error::{BatchError, TransferError};
use crate::store::ObjectStore;
use crate::util::{RetryPolicy, page_progress_style};

pub use aggregate::Tally;
pub use scheduler::{CancelHandle, CancelToken, Cancelled, ConcurrencyBudget, Permit, cancel_pair};

use self::aggregate::Aggregator;
use self::scheduler::PageDispatch;
use self::workers::WorkerCommonCtx;
use self::workers::backup::BackupWorker;
use self::workers::restore::RestoreWorker;

/// One object to move from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source: String,
    pub destination: String,
    pub key: String,
}

/// Per-object failure as reported in the batch summary and the failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectFailure {
    pub key: String,
    pub message: String,
}

impl ObjectFailure {
    pub fn from_error(err: &TransferError) -> Self {
        Self { key: err.key().to_string(), message: err.to_string() }
    }
}

#[derive(Debug)]
pub enum TransferOutcome {
    Succeeded,
    Skipped,
    Failed(ObjectFailure),
}

/// Moves one object. Implementations never panic on storage errors and never
/// return an error: whatever happens becomes the task's single outcome.
pub trait TransferUnit: Sync {
    fn transfer(&self, task: &TransferTask) -> TransferOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Backup,
    Restore,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Backup => "backup",
            BatchKind::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Listing,
    Transferring,
    Finalized,
}

/// Final statistics of one batch. Built once after the aggregator drained.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub kind: BatchKind,
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub total: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub errors: Vec<ObjectFailure>,
}

impl BatchSummary {
    pub fn error_count(&self) -> u64 {
        self.errors.len() as u64
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "source": self.source,
            "destination": self.destination,
            "started_at": self.started_at.to_rfc3339(),
            "duration_secs": self.duration.as_secs_f64(),
            "total": self.total,
            "succeeded": self.succeeded,
            "skipped": self.skipped,
            "errors": self.error_count(),
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} {} -> {}: {} objects, {} written, {} skipped, {} errors in {:.2}s",
            self.kind.as_str(),
            self.source,
            self.destination,
            self.total,
            self.succeeded,
            self.skipped,
            self.error_count(),
            self.duration.as_secs_f64()
        )
    }
}

/// Knobs shared by backup and restore batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub page_size: usize,
    pub codec: Codec,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_size: 1000,
            codec: Codec::default(),
            retry: RetryPolicy::once(),
            show_progress: false,
        }
    }
}

pub struct BackupPlan {
    pub source: Arc<dyn ObjectStore>,
    pub archive: Arc<dyn ObjectStore>,
    pub mode: BackupMode,
    pub options: BatchOptions,
}

pub struct RestorePlan {
    pub archive: Arc<dyn ObjectStore>,
    pub primary: Arc<dyn ObjectStore>,
    pub options: BatchOptions,
}

/// Back up every object of `plan.source` into `plan.archive`.
pub fn run_backup(plan: &BackupPlan, cancel: &CancelToken) -> Result<BatchSummary, BatchError> {
    let worker = BackupWorker {
        common: WorkerCommonCtx { codec: plan.options.codec, retry: plan.options.retry },
        source: plan.source.clone(),
        archive: plan.archive.clone(),
        mode: plan.mode,
    };
    tracing::info!(
        "[backup] {} -> {} ({:?}, concurrency {})",
        plan.source.container(),
        plan.archive.container(),
        plan.mode,
        plan.options.concurrency
    );
    run_batch(
        BatchKind::Backup,
        plan.source.as_ref(),
        plan.archive.container(),
        &worker,
        &plan.options,
        cancel,
    )
}

/// Restore every archived object of `plan.archive` into `plan.primary`.
pub fn run_restore(plan: &RestorePlan, cancel: &CancelToken) -> Result<BatchSummary, BatchError> {
    let worker = RestoreWorker {
        common: WorkerCommonCtx { codec: plan.options.codec, retry: plan.options.retry },
        archive: plan.archive.clone(),
        primary: plan.primary.clone(),
    };
    tracing::info!(
        "[restore] {} -> {} (concurrency {})",
        plan.archive.container(),
        plan.primary.container(),
        plan.options.concurrency
    );
    run_batch(
        BatchKind::Restore,
        plan.archive.as_ref(),
        plan.primary.container(),
        &worker,
        &plan.options,
        cancel,
    )
}

fn enter(kind: BatchKind, phase: &mut BatchPhase, next: BatchPhase) {
    tracing::debug!("[{}] {:?} -> {:?}", kind.as_str(), phase, next);
    *phase = next;
}

fn run_batch<U: TransferUnit>(
    kind: BatchKind,
    listing: &dyn ObjectStore,
    destination: &str,
    unit: &U,
    opts: &BatchOptions,
    cancel: &CancelToken,
) -> Result<BatchSummary, BatchError> {
    let mut phase = BatchPhase::Idle;
    let started_at = Local::now();
    let start = Instant::now();
    let source = listing.container().to_string();
    let budget = ConcurrencyBudget::new(opts.concurrency);
    let aggregator = Aggregator::spawn(kind.as_str());
    let page_size = opts.page_size.max(1);

    let mut total = 0u64;
    let mut cursor: Option<String> = None;
    let mut page_no = 0usize;
    loop {
        enter(kind, &mut phase, BatchPhase::Listing);
        let page = listing
            .list_page(cursor.as_deref(), page_size)
            .map_err(|e| BatchError::Listing { container: source.clone(), source: e })?;
        page_no += 1;
        tracing::debug!("[{}] page {}: {} keys", kind.as_str(), page_no, page.keys.len());

        if !page.keys.is_empty() {
            enter(kind, &mut phase, BatchPhase::Transferring);
            let progress = if opts.show_progress {
                let pb = ProgressBar::new(page.keys.len() as u64);
                pb.set_style(page_progress_style());
                pb.set_message(format!("{} page {}", kind.as_str(), page_no));
                pb
            } else {
                ProgressBar::hidden()
            };
            let dispatch = PageDispatch {
                source: &source,
                destination,
                budget: &budget,
                cancel,
                progress: &progress,
                outcome_tx: aggregator.sender(),
                unit,
            };
            let result = dispatch.run(page.keys);
            progress.finish_and_clear();
            match result {
                Ok(n) => total += n,
                Err(Cancelled) => {
                    tracing::warn!("[{}] cancelled after {} dispatched objects", kind.as_str(), total);
                    // drain the aggregator so its thread exits
                    let _ = aggregator.finish();
                    return Err(BatchError::Cancelled);
                }
            }
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let tally = aggregator.finish().ok_or(BatchError::AggregatorLost)?;
    enter(kind, &mut phase, BatchPhase::Finalized);
    let summary = BatchSummary {
        kind,
        source,
        destination: destination.to_string(),
        started_at,
        duration: start.elapsed(),
        total,
        succeeded: tally.succeeded,
        skipped: tally.skipped,
        errors: tally.failures,
    };
    tracing::info!("{}", summary.summary_line());
    Ok(summary)
}
