//! Repository-wide structured errors for storage and transfer operations.
use std::io;

/// Errors raised by an object store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key has no object in the container.
    #[error("object not found: {0}")]
    NotFound(String),
    /// The container (bucket) itself does not exist.
    #[error("container does not exist: {0}")]
    ContainerMissing(String),
    /// The key cannot name an object (empty, absolute, or with a bad segment).
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
    /// Backend I/O failure; usually transient.
    #[error("storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    /// Stored metadata could not be decoded.
    #[error("corrupt metadata for {key}: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// Fault injected by a test backend.
    #[error("simulated failure for {0}")]
    Simulated(String),
}

impl StoreError {
    pub(crate) fn io(key: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io { key: key.into(), source }
    }
}

/// Per-object failure inside a transfer unit. These never escape the unit:
/// they are turned into a failed outcome and reported through the aggregator.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("open source object {key} failed: {source}")]
    OpenSource {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("open destination object {key} failed: {source}")]
    OpenDestination {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("fingerprint of {key} failed: {source}")]
    Fingerprint {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("reading {key} failed: {source}")]
    ReadStream {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("writing {key} failed: {source}")]
    WriteStream {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("finishing compressed stream of {key} failed: {source}")]
    Finish {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("commit of {key} failed: {source}")]
    Commit {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("transfer of {key} panicked: {message}")]
    Panicked { key: String, message: String },
}

impl TransferError {
    pub fn key(&self) -> &str {
        use TransferError::*;
        match self {
            OpenSource { key, .. }
            | OpenDestination { key, .. }
            | Fingerprint { key, .. }
            | ReadStream { key, .. }
            | WriteStream { key, .. }
            | Finish { key, .. }
            | Commit { key, .. }
            | Panicked { key, .. } => key,
        }
    }

    /// Whether another attempt of the same object may succeed. Missing
    /// objects and invalid keys are permanent; stream I/O is considered
    /// transient.
    pub fn is_retriable(&self) -> bool {
        use TransferError::*;
        match self {
            OpenSource { source, .. }
            | OpenDestination { source, .. }
            | Commit { source, .. } => {
                matches!(source, StoreError::Io { .. } | StoreError::Simulated(_))
            }
            Fingerprint { .. } | ReadStream { .. } | WriteStream { .. } | Finish { .. } => true,
            Panicked { .. } => false,
        }
    }
}

/// Fatal errors that abort a whole batch. No summary is produced.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("listing {container} failed: {source}")]
    Listing {
        container: String,
        #[source]
        source: StoreError,
    },
    #[error("batch cancelled")]
    Cancelled,
    #[error("result aggregator terminated unexpectedly")]
    AggregatorLost,
}

/// Validation errors for a run configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("page size must be at least 1")]
    ZeroPageSize,
    #[error("compression level must be within 0..=9, got {0}")]
    InvalidLevel(u32),
    #[error("max retries must be at least 1")]
    ZeroRetries,
    #[error("{0} must not be empty")]
    Missing(&'static str),
}
