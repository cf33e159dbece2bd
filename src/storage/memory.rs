//! In-memory storage for tests and ephemeral stores.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::{Storage, StorageConfig, StorageError};

/// Blobs kept in a shared map. A write replaces the whole blob under the
/// lock, so readers never see partial contents.
#[derive(Debug)]
pub struct MemoryStorage {
    blobs: RwLock<BTreeMap<String, Arc<[u8]>>>,
    config: StorageConfig,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new(config: StorageConfig) -> Self {
        MemoryStorage {
            blobs: RwLock::new(BTreeMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn new_default() -> Self {
        Self::new(StorageConfig::default())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Total bytes held.
    pub fn total_size(&self) -> usize {
        self.blobs.read().values().map(|blob| blob.len()).sum()
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.check_closed()?;
        self.blobs
            .read()
            .get(name)
            .map(|blob| blob.to_vec())
            .ok_or_else(|| StorageError::NotFound(name.to_string()).into())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.blobs.write().insert(name.to_string(), Arc::from(bytes));
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        !self.closed.load(Ordering::Acquire) && self.blobs.read().contains_key(name)
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.check_closed()?;
        self.blobs.write().remove(name);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_closed()?;
        let mut blobs = self.blobs.write();
        let blob = blobs
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        blobs.insert(to.to_string(), blob);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        self.check_closed()?;
        Ok(self.blobs.read().keys().cloned().collect())
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
