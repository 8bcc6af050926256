use crate::codec::Codec;
use crate::error::TransferError;
use crate::store::{ObjectStore, SourceObject};

/// Result of the incremental-mode check against the archive.
#[derive(Debug)]
pub(crate) enum SkipDecision {
    /// Archive already holds identical compressed content.
    Skip,
    /// Write is needed; the source stream is untouched and can be used as is.
    Write(SourceObject),
    /// Write is needed but the source stream was consumed by hashing; open it
    /// again before writing.
    Reopen,
}

/// Decide whether `source` can be skipped. The source digest is taken over
/// the compressed stream, which is what the archive stores and hashes.
///
/// A missing archive object, a failed lookup or an archive object without a
/// recorded digest all mean "write". Only a read/encode failure while
/// hashing the source is an error.
pub(crate) fn check(
    archive: &dyn ObjectStore,
    codec: &Codec,
    source: SourceObject,
) -> Result<SkipDecision, TransferError> {
    let existing = match archive.stat(&source.key) {
        Ok(Some(attrs)) => attrs,
        Ok(None) => return Ok(SkipDecision::Write(source)),
        Err(e) => {
            tracing::debug!("stat {} on archive failed, writing anyway: {}", source.key, e);
            return Ok(SkipDecision::Write(source));
        }
    };
    let Some(archived_md5) = existing.md5_hex else {
        return Ok(SkipDecision::Write(source));
    };

    let SourceObject { key, body, .. } = source;
    let source_md5 = codec
        .fingerprint(body)
        .map_err(|e| TransferError::Fingerprint { key: key.clone(), source: e })?;
    if source_md5.eq_ignore_ascii_case(&archived_md5) {
        Ok(SkipDecision::Skip)
    } else {
        tracing::debug!("{} changed: {} != {}", key, source_md5, archived_md5);
        Ok(SkipDecision::Reopen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectMetadata};
    use std::io::{Read, Write};

    fn archive_with(codec: &Codec, key: &str, raw: &[u8]) -> MemoryStore {
        let archive = MemoryStore::new("archive");
        let mut enc = codec.encoder(Vec::new());
        enc.write_all(raw).unwrap();
        archive.insert(key, enc.finish().unwrap(), ObjectMetadata::default());
        archive
    }

    fn source_with(key: &str, raw: &[u8]) -> MemoryStore {
        let source = MemoryStore::new("source");
        source.insert(key, raw.to_vec(), ObjectMetadata::default());
        source
    }

    #[test]
    fn absent_archive_object_keeps_stream() {
        let codec = Codec::default();
        let source = source_with("k", b"data");
        let archive = MemoryStore::new("archive");
        let obj = source.open_read("k").unwrap();
        assert!(matches!(check(&archive, &codec, obj).unwrap(), SkipDecision::Write(_)));
    }

    #[test]
    fn identical_content_is_skipped() {
        let codec = Codec::default();
        let source = source_with("k", b"same bytes");
        let archive = archive_with(&codec, "k", b"same bytes");
        let obj = source.open_read("k").unwrap();
        assert!(matches!(check(&archive, &codec, obj).unwrap(), SkipDecision::Skip));
    }

    #[test]
    fn changed_content_needs_reopen() {
        let codec = Codec::default();
        let source = source_with("k", b"new bytes");
        let archive = archive_with(&codec, "k", b"old bytes");
        let obj = source.open_read("k").unwrap();
        assert!(matches!(check(&archive, &codec, obj).unwrap(), SkipDecision::Reopen));
    }

    #[test]
    fn failed_archive_lookup_writes_with_intact_stream() {
        let codec = Codec::default();
        let source = source_with("k", b"keep every byte");
        let archive = archive_with(&codec, "k", b"keep every byte");
        archive.fail_stat_of("k");
        let obj = source.open_read("k").unwrap();
        match check(&archive, &codec, obj).unwrap() {
            SkipDecision::Write(mut obj) => {
                let mut buf = Vec::new();
                obj.body.read_to_end(&mut buf).unwrap();
                assert_eq!(buf, b"keep every byte");
            }
            other => panic!("expected write, got {other:?}"),
        }
    }

    #[test]
    fn broken_source_stream_is_an_error() {
        let codec = Codec::default();
        let source = source_with("k", b"some content here");
        source.fail_reads_of("k");
        let archive = archive_with(&codec, "k", b"whatever");
        let obj = source.open_read("k").unwrap();
        let err = check(&archive, &codec, obj).unwrap_err();
        assert!(matches!(err, TransferError::Fingerprint { .. }));
    }
}
