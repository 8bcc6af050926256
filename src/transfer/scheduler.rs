use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use indicatif::ProgressBar;

use super::{ObjectFailure, TransferOutcome, TransferTask, TransferUnit};
use crate::error::TransferError;

/// Returned when a permit could not be obtained because the batch was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Raising side of a batch-scoped cancellation signal. Dropping the last
/// clone cancels as well.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

/// Observing side of the cancellation signal. Nothing is ever sent on the
/// channel; cancellation is the channel disconnecting.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    (CancelHandle { tx: Arc::new(Mutex::new(Some(tx))) }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::debug!("batch cancellation raised");
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: crossbeam_channel::never() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Counting permit pool: `capacity` tokens pre-loaded into a bounded channel.
#[derive(Debug)]
pub struct ConcurrencyBudget {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

/// A held slot of the budget; the token goes back when this is dropped,
/// whichever way the holder exits.
#[derive(Debug)]
pub struct Permit {
    tx: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

impl ConcurrencyBudget {
    /// A budget of 0 falls back to 1 so at least one task can run.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<()>(capacity);
        for _ in 0..capacity {
            let _ = tx.send(());
        }
        Self { tx, rx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Block until a slot frees up or `cancel` fires.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Permit, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        select! {
            recv(self.rx) -> token => match token {
                Ok(()) => {
                    let permit = Permit { tx: self.tx.clone() };
                    // Both arms may be ready at once; cancellation wins.
                    if cancel.is_cancelled() { Err(Cancelled) } else { Ok(permit) }
                }
                Err(_) => Err(Cancelled),
            },
            recv(cancel.rx) -> _ => Err(Cancelled),
        }
    }
}

/// Outcome of one task as sent to the aggregator.
#[derive(Debug)]
pub(crate) struct OutcomeRecord {
    pub(crate) key: String,
    pub(crate) outcome: TransferOutcome,
}

/// One listing page worth of work.
pub(crate) struct PageDispatch<'a, U: TransferUnit> {
    pub(crate) source: &'a str,
    pub(crate) destination: &'a str,
    pub(crate) budget: &'a ConcurrencyBudget,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) progress: &'a ProgressBar,
    pub(crate) outcome_tx: &'a Sender<OutcomeRecord>,
    pub(crate) unit: &'a U,
}

impl<U: TransferUnit> PageDispatch<'_, U> {
    /// Run one task per key with at most `budget.capacity()` in flight and
    /// return once every launched task has reported. On cancellation no more
    /// tasks are launched; those already running are still awaited.
    ///
    /// Returns the number of tasks dispatched.
    pub(crate) fn run(&self, keys: Vec<String>) -> Result<u64, Cancelled> {
        std::thread::scope(|scope| {
            let mut dispatched = 0u64;
            for key in keys {
                let permit = self.budget.acquire(self.cancel)?;
                dispatched += 1;
                let task = TransferTask {
                    source: self.source.to_string(),
                    destination: self.destination.to_string(),
                    key,
                };
                let tx = self.outcome_tx.clone();
                let unit = self.unit;
                scope.spawn(move || {
                    let _permit = permit;
                    let outcome = run_isolated(unit, &task);
                    let _ = tx.send(OutcomeRecord { key: task.key, outcome });
                });
                self.progress.inc(1);
            }
            Ok(dispatched)
        })
    }
}

// A panicking unit still yields exactly one (failed) outcome.
fn run_isolated<U: TransferUnit>(unit: &U, task: &TransferTask) -> TransferOutcome {
    tracing::debug!("[{}->{}] start {}", task.source, task.destination, task.key);
    match catch_unwind(AssertUnwindSafe(|| unit.transfer(task))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = TransferError::Panicked { key: task.key.clone(), message };
            TransferOutcome::Failed(ObjectFailure::from_error(&err))
        }
    }
}
