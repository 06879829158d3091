//! File-based storage backend: one file per key

use crate::{KeyValueStore, StorageError};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// Configuration for the file store
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding one file per key
    pub data_dir: PathBuf,
    /// Fsync each write before renaming it into place
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./bridgedata"),
            sync_writes: false,
        }
    }
}

/// Directory-backed key/value store
#[derive(Debug)]
pub struct FileStore {
    config: FileStoreConfig,
}

impl FileStore {
    /// Open (and create if needed) the store directory
    pub fn new(config: FileStoreConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        debug!("Opened file store at {:?}", config.data_dir);
        Ok(Self { config })
    }

    /// Store directory
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::Invalid("empty key".to_string()));
        }
        Ok(self
            .config
            .data_dir
            .join(format!("{}{}", encode_key(key), FILE_SUFFIX)))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_.-]` so keys map to safe file names
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut iter = name.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = char::from(iter.next()?).to_digit(16)?;
            let lo = char::from(iter.next()?).to_digit(16)?;
            bytes.push(u8::try_from(hi * 16 + lo).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension(&TMP_SUFFIX[1..]);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(value.as_bytes())?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(FILE_SUFFIX) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => warn!("Skipping undecodable store file {}", name),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
