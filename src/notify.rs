use crate::transfer::BatchSummary;

/// Receives the end-of-batch message. Delivery failures are never fatal.
pub trait Notifier {
    fn notify(&self, message: &str) -> anyhow::Result<()>;
}

/// Writes the message to the log instead of an external channel.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> anyhow::Result<()> {
        tracing::info!("notification:\n{}", message);
        Ok(())
    }
}

/// Markdown message announcing a finished backup.
pub fn format_backup_message(summary: &BatchSummary) -> String {
    let hours = summary.duration.as_secs_f64() / 3600.0;
    format!(
        "### Object storage backup saved\n\
         - Bucket: {}\n\
         - Start: {}\n\
         - Duration: {:.2} hours\n\
         - Objects: {}\n\
         - Skipped: {}\n\
         - Errors: {}\n",
        summary.source,
        summary.started_at.format("%Y/%m/%d %H:%M:%S"),
        hours,
        summary.total,
        summary.skipped,
        summary.error_count()
    )
}

/// Hand `message` to `notifier`, logging instead of propagating a failure.
/// Returns whether delivery succeeded.
pub fn deliver(notifier: &dyn Notifier, message: &str) -> bool {
    match notifier.notify(message) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("notification failed: {:#}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{BatchKind, ObjectFailure};
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    struct Unreachable;

    impl Notifier for Unreachable {
        fn notify(&self, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("webhook unreachable")
        }
    }

    fn summary() -> BatchSummary {
        BatchSummary {
            kind: BatchKind::Backup,
            source: "photos".into(),
            destination: "photos-archive".into(),
            started_at: Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
            duration: Duration::from_secs(5400),
            total: 10,
            succeeded: 6,
            skipped: 3,
            errors: vec![ObjectFailure { key: "x".into(), message: "y".into() }],
        }
    }

    #[test]
    fn message_lists_counts_and_times() {
        let msg = format_backup_message(&summary());
        assert!(msg.starts_with("### Object storage backup saved"));
        assert!(msg.contains("Bucket: photos"));
        assert!(msg.contains("Start: 2024/03/05 07:08:09"));
        assert!(msg.contains("Duration: 1.50 hours"));
        assert!(msg.contains("Objects: 10"));
        assert!(msg.contains("Skipped: 3"));
        assert!(msg.contains("Errors: 1"));
    }

    #[test]
    fn failed_delivery_is_swallowed() {
        assert!(!deliver(&Unreachable, "hi"));
        assert!(deliver(&LogNotifier, "hi"));
    }
}
