//! Storage abstraction layer for ragstore.
//!
//! The embedded backend persists one snapshot blob per collection through the
//! [`Storage`] trait, so durable (file) and ephemeral (memory) deployments
//! share the same code path. Blobs are always read and written whole.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - One file per blob under a single directory
//! - Buffered writes, optional fsync per write, directory sync on `sync`
//!
//! ## MemoryStorage
//! - In-memory storage for testing and temporary data
//! - Fast but non-persistent
//!
//! # Example
//!
//! ```
//! use ragstore::storage::{self, Storage};
//! use ragstore::storage::memory::MemoryStorage;
//!
//! # fn main() -> ragstore::error::Result<()> {
//! let storage = MemoryStorage::new_default();
//! storage::write_atomic(&storage, "docs.snapshot", b"hello")?;
//! assert_eq!(storage.read("docs.snapshot")?, b"hello");
//! assert_eq!(storage.list()?, vec!["docs.snapshot"]);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{RagStoreError, Result};

pub mod file;
pub mod memory;

/// Suffix of blobs that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A flat namespace of named blobs.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Read a whole blob. Fails with [`StorageError::NotFound`] if absent.
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace a blob. Not atomic; see [`write_atomic`].
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn exists(&self, name: &str) -> bool;

    /// Remove a blob. Removing a missing blob is not an error.
    fn remove(&self, name: &str) -> Result<()>;

    /// Rename a blob, replacing the destination if it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Blob names, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Make completed writes and renames durable.
    fn sync(&self) -> Result<()>;

    /// Close the storage. Later calls fail with [`StorageError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Configuration for storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Write buffer size in bytes.
    pub buffer_size: usize,

    /// Whether every write is fsynced before it returns.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            buffer_size: 64 * 1024,
            sync_writes: true,
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("I/O error on {name}: {message}")]
    Io { name: String, message: String },

    #[error("Storage is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn io<E: std::fmt::Display>(name: &str, err: E) -> Self {
        StorageError::Io {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for RagStoreError {
    fn from(err: StorageError) -> Self {
        RagStoreError::storage(err.to_string())
    }
}

/// Whether `name` is a blob left behind by an unfinished [`write_atomic`].
pub fn is_temporary(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Write `bytes` to `name` atomically: the data goes to a temporary blob
/// first and is renamed over the destination once fully written.
pub fn write_atomic(storage: &dyn Storage, name: &str, bytes: &[u8]) -> Result<()> {
    let temp_name = format!("{name}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple());
    if let Err(err) = storage.write(&temp_name, bytes) {
        let _ = storage.remove(&temp_name);
        return Err(err);
    }
    storage.rename(&temp_name, name)
}
