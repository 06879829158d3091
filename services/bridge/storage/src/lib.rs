//! Key/value persistence for wallet bridge sessions with pluggable backends.
//!
//! The session manager persists session records so that a conversation can be
//! resumed after the channel is torn down and rebuilt. Storage is deliberately
//! a flat string key/value interface with prefix enumeration, which is what a
//! browser `localStorage`-like store offers as well as what a directory of
//! files offers.
//!
//! All operations are synchronous: the protocol core mutates state inside a
//! single message or timer callback and never suspends.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored value could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Invalid key or operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String key/value store
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// One file per key under a directory
    File {
        /// Data directory path
        data_dir: PathBuf,
        /// Fsync every write
        #[serde(default)]
        sync_writes: bool,
    },
}

// Re-export backend implementations
pub use backend::file::{FileStore, FileStoreConfig};
pub use backend::mem::MemoryStore;

/// Open the store selected by `mode`
pub fn open_store(mode: &StorageMode) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    match mode {
        StorageMode::InMemory => Ok(Arc::new(MemoryStore::new())),
        StorageMode::File {
            data_dir,
            sync_writes,
        } => {
            let config = FileStoreConfig {
                data_dir: data_dir.clone(),
                sync_writes: *sync_writes,
            };
            Ok(Arc::new(FileStore::new(config)?))
        }
    }
}
