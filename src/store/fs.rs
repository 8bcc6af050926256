//! Directory-backed object store.
//!
//! A container is the directory `<root>/<bucket>`:
//!
//! ```text
//! <root>/<bucket>/objects/<key>              object bytes
//! <root>/<bucket>/meta/<xx>/<md5(key)>.json  key, metadata, digest and file identity
//! <root>/<bucket>/.tmp/                      in-flight writes
//! ```
//!
//! Sidecars are named by the digest of the key so no object key can land on a
//! sidecar path. Writes stream into a temp file and are renamed into place on
//! commit, so a failed or abandoned write never replaces the previous version.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};

use super::{ListPage, ObjectAttributes, ObjectMetadata, ObjectStore, ObjectWriter, SourceObject};
use crate::error::StoreError;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const TMP_DIR: &str = ".tmp";

/// What to do when the container directory does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    MustExist,
    CreateIfMissing,
}

/// Identifies one concrete data file. A rename keeps it; a rewrite changes it.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    size: u64,
    mtime_ns: Option<u64>,
    #[serde(default)]
    ino: u64,
}

impl FileIdentity {
    fn of(md: &std::fs::Metadata) -> Self {
        let mtime_ns = md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| u64::try_from(d.as_nanos()).ok());
        #[cfg(unix)]
        let ino = std::os::unix::fs::MetadataExt::ino(md);
        #[cfg(not(unix))]
        let ino = 0;
        Self { size: md.len(), mtime_ns, ino }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Sidecar {
    #[serde(default)]
    key: String,
    md5_hex: String,
    #[serde(default)]
    file: FileIdentity,
    #[serde(default)]
    metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct FsStore {
    container: String,
    dir: PathBuf,
    created: bool,
}

impl FsStore {
    /// Open the container `bucket` under `root`, creating it per `mode`.
    pub fn open(root: impl AsRef<Path>, bucket: &str, mode: CreateMode) -> Result<Self, StoreError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.') {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        let dir = root.as_ref().join(bucket);
        let exists = dir.join(OBJECTS_DIR).is_dir();
        if !exists && mode == CreateMode::MustExist {
            return Err(StoreError::ContainerMissing(dir.display().to_string()));
        }
        for sub in [OBJECTS_DIR, META_DIR, TMP_DIR] {
            std::fs::create_dir_all(dir.join(sub)).map_err(|e| StoreError::io(bucket, e))?;
        }
        if !exists {
            tracing::info!("created container {}", dir.display());
        }
        Ok(Self { container: bucket.to_string(), dir, created: !exists })
    }

    /// Whether `open` had to create the container directory.
    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the stored bytes for `key`.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join(OBJECTS_DIR).join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let digest = super::md5_hex(key.as_bytes());
        self.dir.join(META_DIR).join(&digest[..2]).join(format!("{digest}.json"))
    }

    fn read_sidecar(&self, key: &str) -> Result<Option<Sidecar>, StoreError> {
        let raw = match std::fs::read(self.meta_path(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(key, e)),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)
            .map_err(|source| StoreError::Metadata { key: key.to_string(), source })?;
        Ok((sidecar.key == key).then_some(sidecar))
    }
}

// Order siblings so that a pre-order walk yields keys in byte order: a
// directory `a` sorts as `a/`, after a file `a.b`.
fn key_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    fn sort_name(e: &DirEntry) -> Vec<u8> {
        let mut name = e.file_name().to_string_lossy().into_owned().into_bytes();
        if e.file_type().is_dir() {
            name.push(b'/');
        }
        name
    }
    sort_name(a).cmp(&sort_name(b))
}

fn rel_key(objects: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(objects).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

impl ObjectStore for FsStore {
    fn container(&self) -> &str {
        &self.container
    }

    /// Walks `objects/` in key order and stops one key past the page, so a
    /// call costs one page of keys however large the container is.
    fn list_page(&self, cursor: Option<&str>, max_keys: usize) -> Result<ListPage, StoreError> {
        let objects = self.dir.join(OBJECTS_DIR);
        if !objects.is_dir() {
            return Err(StoreError::ContainerMissing(objects.display().to_string()));
        }
        let max_keys = max_keys.max(1);
        let root = objects.clone();
        let after = cursor.map(str::to_owned);
        let walker = WalkDir::new(&objects)
            .follow_links(false)
            .sort_by(key_order)
            .into_iter()
            .filter_entry(move |e| {
                // prune directories whose whole subtree sorts at or before the cursor
                let (Some(c), true) = (after.as_deref(), e.depth() > 0 && e.file_type().is_dir()) else {
                    return true;
                };
                match rel_key(&root, e.path()) {
                    Some(dir_key) => {
                        let prefix = format!("{dir_key}/");
                        c.starts_with(&prefix) || prefix.as_str() > c
                    }
                    None => true,
                }
            });

        let mut keys = Vec::new();
        let mut more = false;
        for entry in walker {
            let entry = entry.map_err(|e| StoreError::io(&self.container, io::Error::from(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = rel_key(&objects, entry.path()) else { continue };
            if cursor.is_some_and(|c| key.as_str() <= c) {
                continue;
            }
            if keys.len() == max_keys {
                more = true;
                break;
            }
            keys.push(key);
        }
        let next_cursor = if more { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_cursor })
    }

    fn open_read(&self, key: &str) -> Result<SourceObject, StoreError> {
        super::validate_key(key)?;
        let file = match File::open(self.object_path(key)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StoreError::io(key, e)),
        };
        let metadata = self.read_sidecar(key)?.map(|s| s.metadata).unwrap_or_default();
        Ok(SourceObject { key: key.to_string(), metadata, body: Box::new(BufReader::new(file)) })
    }

    fn stat(&self, key: &str) -> Result<Option<ObjectAttributes>, StoreError> {
        super::validate_key(key)?;
        let md = match std::fs::metadata(self.object_path(key)) {
            Ok(md) if md.is_file() => md,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(key, e)),
        };
        let sidecar = self.read_sidecar(key)?;
        // Only a sidecar written for exactly this data file vouches for it.
        let current = FileIdentity::of(&md);
        let md5_hex = sidecar.as_ref().filter(|s| s.file == current).map(|s| s.md5_hex.clone());
        Ok(Some(ObjectAttributes {
            key: key.to_string(),
            size: md.len(),
            md5_hex,
            metadata: sidecar.map(|s| s.metadata).unwrap_or_default(),
        }))
    }

    fn open_write(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectWriter>, StoreError> {
        super::validate_key(key)?;
        let tmp = NamedTempFile::new_in(self.dir.join(TMP_DIR)).map_err(|e| StoreError::io(key, e))?;
        Ok(Box::new(FsWriter {
            key: key.to_string(),
            metadata: metadata.clone(),
            tmp,
            hasher: Md5::new(),
            object_path: self.object_path(key),
            meta_path: self.meta_path(key),
            tmp_dir: self.dir.join(TMP_DIR),
        }))
    }
}

struct FsWriter {
    key: String,
    metadata: ObjectMetadata,
    tmp: NamedTempFile,
    hasher: Md5,
    object_path: PathBuf,
    meta_path: PathBuf,
    tmp_dir: PathBuf,
}

impl Write for FsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.tmp.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

impl ObjectWriter for FsWriter {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let FsWriter { key, metadata, mut tmp, hasher, object_path, meta_path, tmp_dir } = *self;
        let io_err = |e: io::Error| StoreError::io(&key, e);
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        // rename keeps size, mtime and inode, so this identifies the object file
        let file = FileIdentity::of(&tmp.as_file().metadata().map_err(io_err)?);

        let sidecar = Sidecar { key: key.clone(), md5_hex: hex::encode(hasher.finalize()), file, metadata };
        let body = serde_json::to_vec_pretty(&sidecar)
            .map_err(|source| StoreError::Metadata { key: key.clone(), source })?;
        let mut meta_tmp = NamedTempFile::new_in(&tmp_dir).map_err(io_err)?;
        meta_tmp.write_all(&body).map_err(io_err)?;

        // Object first. If the new sidecar does not follow, the previous one no
        // longer matches the data file and `stat` reports no digest.
        ensure_parent(&object_path).map_err(io_err)?;
        tmp.persist(&object_path).map_err(|e| io_err(e.error))?;
        ensure_parent(&meta_path).map_err(io_err)?;
        meta_tmp.persist(&meta_path).map_err(|e| io_err(e.error))?;
        tracing::debug!("committed {} ({} bytes)", object_path.display(), file.size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn put(store: &FsStore, key: &str, data: &[u8], meta: &ObjectMetadata) {
        let mut w = store.open_write(key, meta).unwrap();
        w.write_all(data).unwrap();
        w.commit().unwrap();
    }

    #[test]
    fn must_exist_rejects_missing_container() {
        let root = tempfile::tempdir().unwrap();
        let err = FsStore::open(root.path(), "nope", CreateMode::MustExist).unwrap_err();
        assert!(matches!(err, StoreError::ContainerMissing(_)));
        let s = FsStore::open(root.path(), "nope", CreateMode::CreateIfMissing).unwrap();
        assert!(s.was_created());
        let again = FsStore::open(root.path(), "nope", CreateMode::MustExist).unwrap();
        assert!(!again.was_created());
    }

    #[test]
    fn commit_then_read_back_with_metadata() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        let meta = ObjectMetadata { content_type: Some("image/png".into()), ..Default::default() };
        put(&s, "img/logo.png", b"pngbytes", &meta);

        let attrs = s.stat("img/logo.png").unwrap().unwrap();
        assert_eq!(attrs.size, 8);
        assert_eq!(attrs.md5_hex.as_deref(), Some(crate::store::md5_hex(b"pngbytes").as_str()));
        assert_eq!(attrs.metadata, meta);

        let mut obj = s.open_read("img/logo.png").unwrap();
        let mut buf = Vec::new();
        obj.body.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"pngbytes");
        assert_eq!(obj.metadata, meta);
    }

    #[test]
    fn dropped_writer_keeps_previous_version() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        put(&s, "k", b"v1", &ObjectMetadata::default());
        {
            let mut w = s.open_write("k", &ObjectMetadata::default()).unwrap();
            w.write_all(b"v2-partial").unwrap();
        }
        assert_eq!(std::fs::read(s.object_path("k")).unwrap(), b"v1");
        assert_eq!(std::fs::read_dir(s.dir().join(TMP_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn listing_is_sorted_and_paged() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        for k in ["z", "a/2", "a/1", "m"] {
            put(&s, k, k.as_bytes(), &ObjectMetadata::default());
        }
        let p1 = s.list_page(None, 3).unwrap();
        assert_eq!(p1.keys, vec!["a/1", "a/2", "m"]);
        let p2 = s.list_page(p1.next_cursor.as_deref(), 3).unwrap();
        assert_eq!(p2.keys, vec!["z"]);
        assert!(p2.next_cursor.is_none());
    }

    #[test]
    fn listing_follows_byte_order_across_directories() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        for k in ["a/1", "a.b", "a-c", "b/x/y", "b/w", "a/0/deep", "c"] {
            put(&s, k, k.as_bytes(), &ObjectMetadata::default());
        }
        let mut expected: Vec<&str> = vec!["a/1", "a.b", "a-c", "b/x/y", "b/w", "a/0/deep", "c"];
        expected.sort();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = s.list_page(cursor.as_deref(), 2).unwrap();
            assert!(page.keys.len() <= 2);
            seen.extend(page.keys);
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(seen, expected);

        // a cursor inside a directory resumes right after it
        let page = s.list_page(Some("a/0/deep"), 10).unwrap();
        assert_eq!(page.keys, vec!["a/1", "b/w", "b/x/y", "c"]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn sidecars_do_not_collide_with_object_keys() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        let plain = ObjectMetadata { content_type: Some("text/plain".into()), ..Default::default() };
        let json = ObjectMetadata { content_type: Some("application/json".into()), ..Default::default() };
        put(&s, "a", b"first", &plain);
        put(&s, "a.json/b", b"second", &json);

        let a = s.stat("a").unwrap().unwrap();
        assert_eq!(a.md5_hex.as_deref(), Some(crate::store::md5_hex(b"first").as_str()));
        assert_eq!(a.metadata, plain);
        let b = s.stat("a.json/b").unwrap().unwrap();
        assert_eq!(b.md5_hex.as_deref(), Some(crate::store::md5_hex(b"second").as_str()));
        assert_eq!(b.metadata, json);
        assert_eq!(s.list_page(None, 10).unwrap().keys, vec!["a", "a.json/b"]);
    }

    #[cfg(unix)]
    #[test]
    fn stale_sidecar_does_not_vouch_for_new_bytes() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        put(&s, "k", b"v1", &ObjectMetadata::default());
        let old_sidecar = std::fs::read(s.meta_path("k")).unwrap();

        // same size, different bytes, sidecar left over from the first version
        put(&s, "k", b"v2", &ObjectMetadata::default());
        std::fs::write(s.meta_path("k"), old_sidecar).unwrap();

        let attrs = s.stat("k").unwrap().unwrap();
        assert_eq!(attrs.size, 2);
        assert_eq!(attrs.md5_hex, None);
    }

    #[test]
    fn failed_object_rename_leaves_no_sidecar() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        put(&s, "k/child", b"occupies k", &ObjectMetadata::default());

        let mut w = s.open_write("k", &ObjectMetadata::default()).unwrap();
        w.write_all(b"new").unwrap();
        assert!(w.commit().is_err());
        assert!(!s.meta_path("k").exists());
        assert!(s.stat("k").unwrap().is_none());
    }

    #[test]
    fn stat_missing_and_unhashed_objects() {
        let root = tempfile::tempdir().unwrap();
        let s = FsStore::open(root.path(), "b", CreateMode::CreateIfMissing).unwrap();
        assert!(s.stat("ghost").unwrap().is_none());
        // bytes dropped in without going through a writer have no digest
        std::fs::write(s.object_path("raw"), b"raw").unwrap();
        let attrs = s.stat("raw").unwrap().unwrap();
        assert_eq!(attrs.md5_hex, None);
        assert!(matches!(s.open_read("ghost"), Err(StoreError::NotFound(_))));
    }
}
