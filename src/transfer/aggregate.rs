use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::scheduler::OutcomeRecord;
use super::{ObjectFailure, TransferOutcome};

/// Per-batch outcome counts. The dispatch total is kept by the dispatcher;
/// this only counts what came back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: u64,
    pub skipped: u64,
    pub failures: Vec<ObjectFailure>,
}

impl Tally {
    pub fn recorded(&self) -> u64 {
        self.succeeded + self.skipped + self.failures.len() as u64
    }

    fn record(&mut self, label: &str, rec: OutcomeRecord) {
        match rec.outcome {
            TransferOutcome::Succeeded => self.succeeded += 1,
            TransferOutcome::Skipped => {
                tracing::debug!("[{}] skipped unchanged {}", label, rec.key);
                self.skipped += 1;
            }
            TransferOutcome::Failed(failure) => {
                tracing::warn!("[{}] failed to transfer {}: {}", label, failure.key, failure.message);
                self.failures.push(failure);
            }
        }
    }
}

/// Single consumer of the outcome channel. Workers only ever send; all
/// counting happens on this one thread, so no lock guards the tally.
pub(crate) struct Aggregator {
    tx: Sender<OutcomeRecord>,
    handle: JoinHandle<Tally>,
}

impl Aggregator {
    pub(crate) fn spawn(label: &'static str) -> Self {
        let (tx, rx) = unbounded::<OutcomeRecord>();
        let handle = std::thread::spawn(move || collect(label, rx));
        Self { tx, handle }
    }

    pub(crate) fn sender(&self) -> &Sender<OutcomeRecord> {
        &self.tx
    }

    /// Close the channel and wait for the final tally. `None` if the
    /// aggregator thread died.
    pub(crate) fn finish(self) -> Option<Tally> {
        let Aggregator { tx, handle } = self;
        drop(tx);
        handle.join().ok()
    }
}

fn collect(label: &str, rx: Receiver<OutcomeRecord>) -> Tally {
    let mut tally = Tally::default();
    for rec in rx {
        tally.record(label, rec);
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, outcome: TransferOutcome) -> OutcomeRecord {
        OutcomeRecord { key: key.to_string(), outcome }
    }

    #[test]
    fn counts_each_kind_of_outcome() {
        let agg = Aggregator::spawn("test");
        let tx = agg.sender().clone();
        tx.send(rec("a", TransferOutcome::Succeeded)).unwrap();
        tx.send(rec("b", TransferOutcome::Skipped)).unwrap();
        tx.send(rec(
            "c",
            TransferOutcome::Failed(ObjectFailure { key: "c".into(), message: "nope".into() }),
        ))
        .unwrap();
        drop(tx);
        let tally = agg.finish().unwrap();
        assert_eq!(tally.succeeded, 1);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.failures.len(), 1);
        assert_eq!(tally.failures[0].key, "c");
        assert_eq!(tally.recorded(), 3);
    }

    #[test]
    fn concurrent_senders_lose_nothing() {
        let agg = Aggregator::spawn("test");
        std::thread::scope(|s| {
            for t in 0..8 {
                let tx = agg.sender().clone();
                s.spawn(move || {
                    for i in 0..250 {
                        let outcome = if i % 5 == 0 {
                            TransferOutcome::Failed(ObjectFailure {
                                key: format!("{t}-{i}"),
                                message: "x".into(),
                            })
                        } else {
                            TransferOutcome::Succeeded
                        };
                        tx.send(rec(&format!("{t}-{i}"), outcome)).unwrap();
                    }
                });
            }
        });
        let tally = agg.finish().unwrap();
        assert_eq!(tally.recorded(), 2000);
        assert_eq!(tally.failures.len(), 400);
    }

    #[test]
    fn empty_batch_tally() {
        let tally = Aggregator::spawn("test").finish().unwrap();
        assert_eq!(tally, Tally::default());
    }
}
