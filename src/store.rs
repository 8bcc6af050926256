// store module: object store collaborators consumed by the migration engine
pub mod fs;
pub mod memory;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use fs::{CreateMode, FsStore};
pub use memory::MemoryStore;

/// Standard HTTP-style object attributes plus free-form user metadata.
/// The engine never interprets these; it only carries them across.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Copy every attribute present on `self` onto `dest`, leaving attributes
    /// that `self` does not provide untouched, and merge user metadata.
    pub fn apply_to(&self, dest: &mut ObjectMetadata) {
        if let Some(v) = &self.content_type {
            dest.content_type = Some(v.clone());
        }
        if let Some(v) = &self.content_encoding {
            dest.content_encoding = Some(v.clone());
        }
        if let Some(v) = &self.content_disposition {
            dest.content_disposition = Some(v.clone());
        }
        if let Some(v) = &self.content_language {
            dest.content_language = Some(v.clone());
        }
        if let Some(v) = &self.cache_control {
            dest.cache_control = Some(v.clone());
        }
        for (k, v) in &self.user {
            dest.user.insert(k.clone(), v.clone());
        }
    }
}

/// What `stat` knows about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub key: String,
    pub size: u64,
    /// Lowercase hex MD5 over the stored bytes, when the backend records one.
    pub md5_hex: Option<String>,
    pub metadata: ObjectMetadata,
}

/// An opened object: its metadata and a byte stream over its content.
pub struct SourceObject {
    pub key: String,
    pub metadata: ObjectMetadata,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for SourceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceObject")
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// One page of a key listing, in ascending key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Cursor for the following page; `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Sink for a new object version.
///
/// Implementors must only materialize the object when `commit` succeeds.
/// Dropping a writer without committing discards everything written so far
/// and leaves any previous version of the object untouched.
pub trait ObjectWriter: Write + Send {
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Trait abstracting the storage operations used by workers. Readers and
/// writers are boxed so tests can inject failing streams. Implementors are
/// shared across worker threads.
pub trait ObjectStore: Send + Sync {
    /// Name of the container (bucket) this handle addresses.
    fn container(&self) -> &str;

    /// List up to `max_keys` keys strictly after `cursor`.
    fn list_page(&self, cursor: Option<&str>, max_keys: usize) -> Result<ListPage, StoreError>;

    fn open_read(&self, key: &str) -> Result<SourceObject, StoreError>;

    /// `Ok(None)` when the object does not exist.
    fn stat(&self, key: &str) -> Result<Option<ObjectAttributes>, StoreError>;

    fn open_write(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectWriter>, StoreError>;
}

/// Keys map onto file paths in [`FsStore`], so both backends apply the same
/// rules: non-empty, relative, no `.`/`..` or empty segments.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad { Err(StoreError::InvalidKey(key.to_string())) } else { Ok(()) }
}

/// Lowercase hex MD5 of a byte slice.
pub(crate) fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_to_keeps_absent_attributes() {
        let src = ObjectMetadata {
            content_type: Some("text/plain".into()),
            user: BTreeMap::from([("owner".to_string(), "ops".to_string())]),
            ..Default::default()
        };
        let mut dest = ObjectMetadata {
            cache_control: Some("no-cache".into()),
            user: BTreeMap::from([("tier".to_string(), "cold".to_string())]),
            ..Default::default()
        };
        src.apply_to(&mut dest);
        assert_eq!(dest.content_type.as_deref(), Some("text/plain"));
        assert_eq!(dest.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(dest.content_encoding, None);
        assert_eq!(dest.user.len(), 2);
        assert_eq!(dest.user["owner"], "ops");
    }

    #[test]
    fn key_rules() {
        assert!(validate_key("a/b/c.txt").is_ok());
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a/", "a\\b"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn md5_of_hello() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
