//! In-memory backend.
//!
//! Cloned handles share one map, so a respawned worker reopening the same
//! `MemoryBackend` sees everything the previous worker wrote.

use super::{Backend, BackendFactory};
use crate::core::Entries;
use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// In-memory key-value backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Entries>>,
    defaults: Arc<Entries>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `defaults`; `clear` restores them
    pub fn with_defaults(defaults: Entries) -> Self {
        Self {
            data: Arc::new(RwLock::new(defaults.clone())),
            defaults: Arc::new(defaults),
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Entries {
        self.data.read().clone()
    }
}

impl Backend for MemoryBackend {
    fn entries(&self) -> Result<Entries> {
        Ok(self.data.read().clone())
    }

    fn replace_entries(&mut self, entries: Entries) -> Result<()> {
        *self.data.write() = entries;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.data.write().shift_remove(key).is_some())
    }

    fn clear(&mut self) -> Result<()> {
        *self.data.write() = (*self.defaults).clone();
        Ok(())
    }
}

impl BackendFactory for MemoryBackend {
    fn open(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "memory backend".to_string()
    }
}
