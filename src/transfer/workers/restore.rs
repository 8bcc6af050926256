use std::sync::Arc;

use super::{Action, COPY_BUF_SIZE, CopyError, WorkerCommonCtx, copy_stream};
use crate::error::TransferError;
use crate::store::{ObjectMetadata, ObjectStore, SourceObject};
use crate::transfer::{TransferOutcome, TransferTask, TransferUnit};

/// Streams one archived object through the decompressor back into the
/// primary store. Every listed object is restored; there is no skip check.
pub(crate) struct RestoreWorker {
    pub(crate) common: WorkerCommonCtx,
    pub(crate) archive: Arc<dyn ObjectStore>,
    pub(crate) primary: Arc<dyn ObjectStore>,
}

impl TransferUnit for RestoreWorker {
    fn transfer(&self, task: &TransferTask) -> TransferOutcome {
        self.common.settle(&task.key, || self.restore_once(&task.key))
    }
}

impl RestoreWorker {
    fn restore_once(&self, key: &str) -> Result<Action, TransferError> {
        let SourceObject { key, metadata: archived_meta, body } = self
            .archive
            .open_read(key)
            .map_err(|e| TransferError::OpenSource { key: key.to_string(), source: e })?;
        let mut meta = ObjectMetadata::default();
        archived_meta.apply_to(&mut meta);

        let mut sink = self
            .primary
            .open_write(&key, &meta)
            .map_err(|e| TransferError::OpenDestination { key: key.clone(), source: e })?;
        let mut decoder = self.common.codec.decoder(body);
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        // A corrupt gzip stream surfaces as a read error on the decoder.
        let n = copy_stream(&mut decoder, &mut sink, &mut buf).map_err(|e| match e {
            CopyError::Read(e) => TransferError::ReadStream { key: key.clone(), source: e },
            CopyError::Write(e) => TransferError::WriteStream { key: key.clone(), source: e },
        })?;
        sink.commit().map_err(|e| TransferError::Commit { key: key.clone(), source: e })?;
        tracing::debug!("[restore] wrote {} ({} bytes)", key, n);
        Ok(Action::Written)
    }
}
