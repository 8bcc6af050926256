//! In-process object store.
//!
//! Holds every object in a `BTreeMap` behind a mutex so listings come out in
//! key order. Besides serving as a scratch backend it carries fault injection
//! (failing reads, stats, writes and listings) and per-key commit counters, which is
//! what the engine tests are built on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ListPage, ObjectAttributes, ObjectMetadata, ObjectStore, ObjectWriter, SourceObject};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: ObjectMetadata,
    md5_hex: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    commits: HashMap<String, usize>,
    failing_reads: HashSet<String>,
    failing_stats: HashSet<String>,
    failing_writes: HashSet<String>,
    failing_listing: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    container: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new(container: impl Into<String>) -> Self {
        Self { container: container.into(), inner: Arc::new(Mutex::new(Inner::default())) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly, bypassing the writer path and commit counters.
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>, metadata: ObjectMetadata) {
        let data = data.into();
        let md5_hex = super::md5_hex(&data);
        self.lock().objects.insert(key.to_string(), StoredObject { data, metadata, md5_hex });
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.lock().objects.get(key).map(|o| o.metadata.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful writer commits for `key`.
    pub fn commit_count(&self, key: &str) -> usize {
        self.lock().commits.get(key).copied().unwrap_or(0)
    }

    /// Total successful writer commits across all keys.
    pub fn total_commits(&self) -> usize {
        self.lock().commits.values().sum()
    }

    /// Reads of `key` open fine but fail part-way through the stream.
    pub fn fail_reads_of(&self, key: &str) {
        self.lock().failing_reads.insert(key.to_string());
    }

    /// Writes to `key` fail on the first written chunk.
    pub fn fail_writes_of(&self, key: &str) {
        self.lock().failing_writes.insert(key.to_string());
    }

    /// `stat` of `key` returns a backend error instead of attributes.
    pub fn fail_stat_of(&self, key: &str) {
        self.lock().failing_stats.insert(key.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().failing_listing = fail;
    }
}

impl ObjectStore for MemoryStore {
    fn container(&self) -> &str {
        &self.container
    }

    fn list_page(&self, cursor: Option<&str>, max_keys: usize) -> Result<ListPage, StoreError> {
        let inner = self.lock();
        if inner.failing_listing {
            return Err(StoreError::Simulated(format!("list {}", self.container)));
        }
        let max_keys = max_keys.max(1);
        let mut iter = inner
            .objects
            .keys()
            .filter(|k| cursor.is_none_or(|c| k.as_str() > c))
            .cloned();
        let keys: Vec<String> = iter.by_ref().take(max_keys).collect();
        let next_cursor =
            if iter.next().is_some() { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_cursor })
    }

    fn open_read(&self, key: &str) -> Result<SourceObject, StoreError> {
        let inner = self.lock();
        let obj = inner.objects.get(key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let body: Box<dyn Read + Send> = if inner.failing_reads.contains(key) {
            Box::new(PartialReader::new(&obj.data, 1))
        } else {
            Box::new(Cursor::new(obj.data.clone()))
        };
        Ok(SourceObject { key: key.to_string(), metadata: obj.metadata.clone(), body })
    }

    fn stat(&self, key: &str) -> Result<Option<ObjectAttributes>, StoreError> {
        let inner = self.lock();
        if inner.failing_stats.contains(key) {
            return Err(StoreError::Simulated(format!("stat {key}")));
        }
        Ok(inner.objects.get(key).map(|o| ObjectAttributes {
            key: key.to_string(),
            size: o.data.len() as u64,
            md5_hex: Some(o.md5_hex.clone()),
            metadata: o.metadata.clone(),
        }))
    }

    fn open_write(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectWriter>, StoreError> {
        super::validate_key(key)?;
        let fail_after_writes = if self.lock().failing_writes.contains(key) { Some(0) } else { None };
        Ok(Box::new(MemoryWriter {
            key: key.to_string(),
            metadata: metadata.clone(),
            buf: Vec::new(),
            writes: 0,
            fail_after_writes,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryWriter {
    key: String,
    metadata: ObjectMetadata,
    buf: Vec<u8>,
    writes: usize,
    fail_after_writes: Option<usize>,
    inner: Arc<Mutex<Inner>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_after_writes.is_some_and(|n| self.writes >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
        }
        self.writes += 1;
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryWriter {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryWriter { key, metadata, buf, inner, .. } = *self;
        let md5_hex = super::md5_hex(&buf);
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.objects.insert(key.clone(), StoredObject { data: buf, metadata, md5_hex });
        *inner.commits.entry(key).or_default() += 1;
        Ok(())
    }
}

// PartialReader yields `ok_reads` chunks then fails, simulating a stream
// that breaks after the transfer has started.
struct PartialReader {
    data: Vec<u8>,
    pos: usize,
    reads: usize,
    ok_reads: usize,
}

impl PartialReader {
    fn new(data: &[u8], ok_reads: usize) -> Self {
        Self { data: data.to_vec(), pos: 0, reads: 0, ok_reads }
    }
}

impl Read for PartialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reads >= self.ok_reads {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated read failure"));
        }
        self.reads += 1;
        // Never report EOF before the failure point.
        let remaining = self.data.len() - self.pos;
        let n = buf.len().min(remaining).min(self.data.len().div_ceil(2));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated read failure"));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let s = MemoryStore::new("src");
        for k in ["a", "b", "c", "d", "e"] {
            s.insert(k, k.as_bytes().to_vec(), ObjectMetadata::default());
        }
        s
    }

    #[test]
    fn pages_walk_all_keys_in_order() {
        let s = seeded();
        let p1 = s.list_page(None, 2).unwrap();
        assert_eq!(p1.keys, vec!["a", "b"]);
        let p2 = s.list_page(p1.next_cursor.as_deref(), 2).unwrap();
        assert_eq!(p2.keys, vec!["c", "d"]);
        let p3 = s.list_page(p2.next_cursor.as_deref(), 2).unwrap();
        assert_eq!(p3.keys, vec!["e"]);
        assert!(p3.next_cursor.is_none());
    }

    #[test]
    fn exact_page_boundary_has_no_cursor() {
        let s = seeded();
        let p = s.list_page(None, 5).unwrap();
        assert_eq!(p.keys.len(), 5);
        assert!(p.next_cursor.is_none());
    }

    #[test]
    fn uncommitted_writer_leaves_no_object() {
        let s = MemoryStore::new("dst");
        {
            let mut w = s.open_write("x", &ObjectMetadata::default()).unwrap();
            w.write_all(b"half").unwrap();
        }
        assert!(s.stat("x").unwrap().is_none());
        let mut w = s.open_write("x", &ObjectMetadata::default()).unwrap();
        w.write_all(b"full").unwrap();
        w.commit().unwrap();
        assert_eq!(s.bytes("x").unwrap(), b"full");
        assert_eq!(s.commit_count("x"), 1);
    }

    #[test]
    fn failing_read_breaks_mid_stream() {
        let s = seeded();
        s.insert("big", vec![7u8; 64], ObjectMetadata::default());
        s.fail_reads_of("big");
        let mut obj = s.open_read("big").unwrap();
        let mut out = Vec::new();
        let err = obj.body.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(!out.is_empty());
    }

    #[test]
    fn failing_stat_is_an_error() {
        let s = seeded();
        s.fail_stat_of("c");
        assert!(matches!(s.stat("c"), Err(StoreError::Simulated(_))));
        assert!(s.stat("d").unwrap().is_some());
    }

    #[test]
    fn failing_write_rejects_first_chunk() {
        let s = MemoryStore::new("dst");
        s.fail_writes_of("k");
        let mut w = s.open_write("k", &ObjectMetadata::default()).unwrap();
        assert!(w.write_all(b"data").is_err());
    }
}
