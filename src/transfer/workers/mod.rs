pub(crate) mod backup;
pub(crate) mod restore;

use std::io::{self, Read, Write};

use crate::codec::Codec;
use crate::error::TransferError;
use crate::util::{RetryPolicy, retry_operation};

use super::{ObjectFailure, TransferOutcome};

/// What a single successful attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Written,
    Skipped,
}

/// Settings shared by every worker of a batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerCommonCtx {
    pub(crate) codec: Codec,
    pub(crate) retry: RetryPolicy,
}

impl WorkerCommonCtx {
    /// Run `attempt` under the retry policy and fold the result into the
    /// task's one outcome.
    pub(crate) fn settle<F>(&self, key: &str, attempt: F) -> TransferOutcome
    where
        F: FnMut() -> Result<Action, TransferError>,
    {
        match retry_operation(self.retry, key, attempt, TransferError::is_retriable) {
            Ok(Action::Written) => TransferOutcome::Succeeded,
            Ok(Action::Skipped) => TransferOutcome::Skipped,
            Err(e) => TransferOutcome::Failed(ObjectFailure::from_error(&e)),
        }
    }
}

// io::copy merges read and write failures into one error; keep them apart so
// the failure names the side that broke.
pub(crate) enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

pub(crate) fn copy_stream<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
) -> Result<u64, CopyError> {
    let mut total = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
}

pub(crate) const COPY_BUF_SIZE: usize = 256 * 1024;
