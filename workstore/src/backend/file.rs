//! JSON file backend.
//!
//! The whole mapping lives in one JSON object. Every write replaces the file
//! atomically: the new content goes to a temp file in the same directory,
//! is synced, then renamed over the old one.

use super::{Backend, BackendFactory};
use crate::config::StoreConfig;
use crate::core::Entries;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File-backed key-value backend
pub struct FileBackend {
    path: PathBuf,
    defaults: Entries,
    entries: Entries,
}

impl FileBackend {
    /// Opens or creates the store file at `path`.
    ///
    /// Values found on disk win over `defaults`; defaults fill in missing keys.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directory cannot be created
    /// - The file exists but cannot be read
    /// - The file is not a JSON object
    pub fn open<P: AsRef<Path>>(path: P, defaults: Entries) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let mut entries = defaults.clone();
        match std::fs::read(&path) {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => {}
            Ok(raw) => {
                let persisted: Entries = serde_json::from_slice(&raw)
                    .with_context(|| format!("Failed to parse store file: {}", path.display()))?;
                entries.extend(persisted);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read store file: {}", path.display()));
            }
        }

        debug!("Opened store file {:?} with {} keys", path, entries.len());

        Ok(Self {
            path,
            defaults,
            entries,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Entries) -> Result<()> {
        let data = serde_json::to_vec(entries).context("Failed to serialize store")?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&data).context("Failed to write store")?;
        tmp.as_file().sync_all().context("Failed to sync store")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace store file: {}", self.path.display()))?;

        Ok(())
    }

    // Persist first so a failed write leaves memory and disk in agreement
    fn commit(&mut self, entries: Entries) -> Result<()> {
        self.persist(&entries)?;
        self.entries = entries;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn entries(&self) -> Result<Entries> {
        Ok(self.entries.clone())
    }

    fn replace_entries(&mut self, entries: Entries) -> Result<()> {
        self.commit(entries)
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut next = self.entries.clone();
        next.insert(key.to_string(), value);
        self.commit(next)
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.shift_remove(key);
        self.commit(next)?;
        Ok(true)
    }

    fn clear(&mut self) -> Result<()> {
        self.commit(self.defaults.clone())
    }
}

/// Opens [`FileBackend`]s for a store configuration
#[derive(Debug, Clone)]
pub struct FileBackendFactory {
    path: PathBuf,
    defaults: Entries,
}

impl FileBackendFactory {
    pub fn new(path: impl Into<PathBuf>, defaults: Entries) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    /// Factory for the file described by `config`
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.store_path(), config.defaults.clone())
    }
}

impl BackendFactory for FileBackendFactory {
    fn open(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(FileBackend::open(&self.path, self.defaults.clone())?))
    }

    fn describe(&self) -> String {
        format!("file backend at {}", self.path.display())
    }
}
