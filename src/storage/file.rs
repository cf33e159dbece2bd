//! Directory-backed storage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{RagStoreError, Result};
use crate::storage::{Storage, StorageConfig, StorageError};

/// One file per blob under a single directory. Subdirectories and names
/// containing path separators are not part of the namespace.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    config: StorageConfig,
    closed: AtomicBool,
}

impl FileStorage {
    /// Open storage rooted at `directory`, creating it if needed.
    pub fn new<P: AsRef<Path>>(directory: P, config: StorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            RagStoreError::storage(format!("cannot create {}: {e}", directory.display()))
        })?;
        if !directory.is_dir() {
            return Err(RagStoreError::storage(format!(
                "{} is not a directory",
                directory.display()
            )));
        }

        Ok(FileStorage {
            directory,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::io(name, "invalid blob name").into());
        }
        Ok(self.directory.join(name))
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }
}

fn map_io(name: &str, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::io(name, err)
    }
}

impl Storage for FileStorage {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.check_closed()?;
        Ok(fs::read(self.path(name)?).map_err(|e| map_io(name, e))?)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.check_closed()?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(name)?)
            .map_err(|e| map_io(name, e))?;

        let mut writer = BufWriter::with_capacity(self.config.buffer_size.max(1), file);
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| map_io(name, e))?;
        if self.config.sync_writes {
            writer.get_ref().sync_all().map_err(|e| map_io(name, e))?;
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        !self.closed.load(Ordering::Acquire) && self.path(name).is_ok_and(|p| p.is_file())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.check_closed()?;
        match fs::remove_file(self.path(name)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(map_io(name, e).into()),
            _ => Ok(()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_closed()?;
        fs::rename(self.path(from)?, self.path(to)?).map_err(|e| map_io(from, e))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        self.check_closed()?;
        let dir = self.directory.display().to_string();
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(|e| map_io(&dir, e))? {
            let entry = entry.map_err(|e| map_io(&dir, e))?;
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()?;
        // Renames become durable once the directory entry is synced.
        #[cfg(unix)]
        {
            let dir = self.directory.display().to_string();
            File::open(&self.directory)
                .and_then(|d| d.sync_all())
                .map_err(|e| map_io(&dir, e))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
