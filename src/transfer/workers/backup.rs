use std::sync::Arc;

use super::{Action, COPY_BUF_SIZE, CopyError, WorkerCommonCtx, copy_stream};
use crate::config::BackupMode;
use crate::error::TransferError;
use crate::store::{ObjectMetadata, ObjectStore, SourceObject};
use crate::transfer::skip::{self, SkipDecision};
use crate::transfer::{TransferOutcome, TransferTask, TransferUnit};

/// Copies one source object into the archive, gzip-compressing on the way.
pub(crate) struct BackupWorker {
    pub(crate) common: WorkerCommonCtx,
    pub(crate) source: Arc<dyn ObjectStore>,
    pub(crate) archive: Arc<dyn ObjectStore>,
    pub(crate) mode: BackupMode,
}

impl TransferUnit for BackupWorker {
    fn transfer(&self, task: &TransferTask) -> TransferOutcome {
        self.common.settle(&task.key, || self.backup_once(&task.key))
    }
}

impl BackupWorker {
    fn open_source(&self, key: &str) -> Result<SourceObject, TransferError> {
        self.source
            .open_read(key)
            .map_err(|e| TransferError::OpenSource { key: key.to_string(), source: e })
    }

    fn backup_once(&self, key: &str) -> Result<Action, TransferError> {
        let object = self.open_source(key)?;
        let object = match self.mode {
            BackupMode::Full => object,
            BackupMode::Incremental => {
                match skip::check(self.archive.as_ref(), &self.common.codec, object)? {
                    SkipDecision::Skip => return Ok(Action::Skipped),
                    SkipDecision::Write(object) => object,
                    // hashing consumed the stream
                    SkipDecision::Reopen => self.open_source(key)?,
                }
            }
        };
        self.write_compressed(object)?;
        Ok(Action::Written)
    }

    fn write_compressed(&self, object: SourceObject) -> Result<(), TransferError> {
        let SourceObject { key, metadata: src_meta, mut body } = object;
        let mut dest_meta = ObjectMetadata::default();
        src_meta.apply_to(&mut dest_meta);

        let sink = self
            .archive
            .open_write(&key, &dest_meta)
            .map_err(|e| TransferError::OpenDestination { key: key.clone(), source: e })?;
        let mut encoder = self.common.codec.encoder(sink);
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let raw = copy_stream(&mut body, &mut encoder, &mut buf).map_err(|e| match e {
            CopyError::Read(e) => TransferError::ReadStream { key: key.clone(), source: e },
            CopyError::Write(e) => TransferError::WriteStream { key: key.clone(), source: e },
        })?;
        // Order matters: the compressor trailer must be in the sink before the
        // sink commits, otherwise the archived object is truncated.
        let sink = encoder
            .finish()
            .map_err(|e| TransferError::Finish { key: key.clone(), source: e })?;
        sink.commit().map_err(|e| TransferError::Commit { key: key.clone(), source: e })?;
        tracing::debug!("[backup] wrote {} ({} raw bytes)", key, raw);
        Ok(())
    }
}
