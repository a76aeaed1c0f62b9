//! Key-value storage for raw image bytes and project documents.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::CompositorError;

pub const CONTENT_KEY_PREFIX: &str = "img-";
const MAX_KEY_LEN: usize = 128;

pub trait ByteStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), CompositorError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CompositorError>;
}

/// Content address for `bytes`: `img-` followed by the hex SHA-256.
pub fn content_key(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{CONTENT_KEY_PREFIX}{digest:x}")
}

/// Keys double as file names, so they are restricted to lowercase ASCII
/// letters, digits, `-` and `_`, starting with a letter or digit.
pub fn validate_key(key: &str) -> Result<(), CompositorError> {
    let Some(first) = key.chars().next() else {
        return Err(CompositorError::persistence(key, "store key cannot be empty"));
    };
    if key.len() > MAX_KEY_LEN {
        return Err(CompositorError::persistence(
            key,
            format!("store key longer than {MAX_KEY_LEN} bytes"),
        ));
    }
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(CompositorError::persistence(
            key,
            "store key must start with a lowercase letter or digit",
        ));
    }
    if let Some(bad) = key
        .chars()
        .find(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-' || *ch == '_'))
    {
        return Err(CompositorError::persistence(
            key,
            format!("store key contains invalid character {bad:?}"),
        ));
    }
    Ok(())
}

/// In-process store. `failing()` builds one that rejects every write.
#[derive(Debug, Default, Clone)]
pub struct MemoryByteStore {
    entries: BTreeMap<String, Vec<u8>>,
    fail_puts: bool,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    pub fn set_fail_puts(&mut self, fail: bool) {
        self.fail_puts = fail;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ByteStore for MemoryByteStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), CompositorError> {
        validate_key(key)?;
        if self.fail_puts {
            return Err(CompositorError::persistence(key, "store rejected the write"));
        }
        self.entries.insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CompositorError> {
        validate_key(key)?;
        Ok(self.entries.get(key).cloned())
    }
}

/// One file per key under `root`.
#[derive(Debug, Clone)]
pub struct DirByteStore {
    root: PathBuf,
}

impl DirByteStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CompositorError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            CompositorError::persistence(
                "",
                format!("failed to create store directory {}: {error}", root.display()),
            )
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ByteStore for DirByteStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), CompositorError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let staging = self.root.join(format!(".{key}.tmp"));
        fs::write(&staging, bytes)
            .and_then(|()| fs::rename(&staging, &path))
            .map_err(|error| {
                let _ = fs::remove_file(&staging);
                CompositorError::persistence(
                    key,
                    format!("failed to write {}: {error}", path.display()),
                )
            })?;
        tracing::debug!(key, bytes = bytes.len(), "stored bytes");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CompositorError> {
        validate_key(key)?;
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(CompositorError::persistence(
                key,
                format!("failed to read {}: {error}", path.display()),
            )),
        }
    }
}
