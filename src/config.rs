use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::codec::Codec;
use crate::error::ConfigError;
use crate::transfer::BatchOptions;
use crate::util::RetryPolicy;

pub const DEFAULT_ARCHIVE_SUFFIX: &str = "-archive";
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Skip objects whose compressed digest already matches the archive.
    #[default]
    Incremental,
    /// Rewrite every object.
    Full,
}

/// Settings of one `cm` invocation. Built from CLI arguments and the
/// environment, validated once and then passed around by reference.
#[derive(Serialize, Debug, Clone)]
pub struct Config {
    pub source_root: PathBuf,
    pub source_bucket: String,
    pub archive_root: PathBuf,
    pub archive_suffix: String,
    // explicit archive bucket for restore; otherwise `<source_bucket><suffix>`
    pub archive_bucket: Option<String>,
    pub concurrency: usize,
    pub mode: BackupMode,
    pub page_size: usize,
    pub level: u32,
    pub max_retries: usize,
    pub backoff_ms: u64,
    pub state_dir: PathBuf,
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            source_bucket: String::new(),
            archive_root: PathBuf::from("."),
            archive_suffix: DEFAULT_ARCHIVE_SUFFIX.to_string(),
            archive_bucket: None,
            concurrency: DEFAULT_CONCURRENCY,
            mode: BackupMode::Incremental,
            page_size: DEFAULT_PAGE_SIZE,
            level: crate::codec::DEFAULT_LEVEL,
            max_retries: 1,
            backoff_ms: 100,
            state_dir: default_state_dir(),
            json: false,
            quiet: false,
            verbose: false,
        }
    }
}

/// `~/.coldmirror`, or `.coldmirror` in the working directory when there is no home.
pub fn default_state_dir() -> PathBuf {
    let dir = ".".to_owned() + env!("CARGO_PKG_NAME");
    match dirs::home_dir() {
        Some(home) => home.join(dir),
        None => PathBuf::from(dir),
    }
}

impl Config {
    pub fn archive_bucket(&self) -> String {
        match &self.archive_bucket {
            Some(b) => b.clone(),
            None => format!("{}{}", self.source_bucket, self.archive_suffix),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_bucket.trim().is_empty() {
            return Err(ConfigError::Missing("source bucket"));
        }
        if self.archive_bucket().trim().is_empty() {
            return Err(ConfigError::Missing("archive bucket"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.level > 9 {
            return Err(ConfigError::InvalidLevel(self.level));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.level)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency,
            page_size: self.page_size,
            codec: self.codec(),
            retry: self.retry_policy(),
            show_progress: !self.quiet && !self.json,
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
