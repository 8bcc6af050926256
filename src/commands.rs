use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::notify::{self, Notifier};
use crate::store::{CreateMode, FsStore};
use crate::transfer::{self, BackupPlan, BatchSummary, CancelToken, RestorePlan};
use crate::util::{print_summary, write_failures_jsonl};

fn open_bucket(root: &Path, bucket: &str, mode: CreateMode, role: &str) -> Result<FsStore> {
    let store = FsStore::open(root, bucket, mode)
        .with_context(|| format!("{} bucket '{}' under {}", role, bucket, root.display()))?;
    let state = if store.was_created() { "Created" } else { "Already exists" };
    println!("  {:<8} {} ({})", role, bucket, state);
    Ok(store)
}

fn report(config: &Config, summary: &BatchSummary) {
    print_summary(summary);
    if let Some(path) = write_failures_jsonl(&config.state_dir, &summary.errors) {
        println!("failures written to {}", path.display());
    }
    if config.json {
        println!("{}", summary.to_json());
    }
}

/// One backup pass: source bucket must exist, archive bucket is created on demand.
pub fn handle_backup(config: &Config, notifier: &dyn Notifier, cancel: &CancelToken) -> Result<BatchSummary> {
    config.validate().context("invalid configuration")?;
    println!("Target buckets:");
    let source = open_bucket(&config.source_root, &config.source_bucket, CreateMode::MustExist, "source")?;
    let archive =
        open_bucket(&config.archive_root, &config.archive_bucket(), CreateMode::CreateIfMissing, "archive")?;

    let plan = BackupPlan {
        source: Arc::new(source),
        archive: Arc::new(archive),
        mode: config.mode,
        options: config.batch_options(),
    };
    let summary = transfer::run_backup(&plan, cancel).context("backup aborted")?;
    report(config, &summary);
    notify::deliver(notifier, &notify::format_backup_message(&summary));
    Ok(summary)
}

/// One restore pass: archive bucket must exist, primary bucket is created on demand.
pub fn handle_restore(config: &Config, cancel: &CancelToken) -> Result<BatchSummary> {
    config.validate().context("invalid configuration")?;
    println!("Target buckets:");
    let archive =
        open_bucket(&config.archive_root, &config.archive_bucket(), CreateMode::MustExist, "archive")?;
    let primary =
        open_bucket(&config.source_root, &config.source_bucket, CreateMode::CreateIfMissing, "primary")?;

    let plan = RestorePlan {
        archive: Arc::new(archive),
        primary: Arc::new(primary),
        options: config.batch_options(),
    };
    let summary = transfer::run_restore(&plan, cancel).context("restore aborted")?;
    report(config, &summary);
    Ok(summary)
}

pub fn handle_decompress(config: &Config, file: &Path, output_dir: &Path) -> Result<()> {
    let out = crate::codec::decompress_file(&config.codec(), file, output_dir)?;
    println!("decompressed {} -> {}", file.display(), out.display());
    Ok(())
}
