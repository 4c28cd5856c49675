//! Persisted key-value backends wrapped by the worker.
//!
//! The worker owns exactly one backend instance at a time and drives it from
//! a single thread, so the trait is synchronous and only needs `Send`.
//! Durability, atomic writes, validation and migrations are the backend's
//! business; the worker only sees the operations below.
//!
//! - **FileBackend**: JSON file with atomic replace (default)
//! - **MemoryBackend**: shared in-memory map (testing/embedding)
//!
//! # Custom Backends
//!
//! ```ignore
//! use workstore::backend::{Backend, BackendFactory};
//!
//! struct SqliteFactory { /* ... */ }
//! impl BackendFactory for SqliteFactory { /* ... */ }
//!
//! let store = Store::with_backend(config, Arc::new(SqliteFactory::new()))?;
//! ```

mod file;
mod memory;

pub use file::{FileBackend, FileBackendFactory};
pub use memory::MemoryBackend;

use crate::core::Entries;
use anyhow::Result;
use serde_json::Value;

/// Backend trait for persisted key-value storage.
pub trait Backend: Send {
    /// Returns the full mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn entries(&self) -> Result<Entries>;

    /// Replaces the full mapping in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the new state could not be persisted; the previous
    /// state must then still be intact.
    fn replace_entries(&mut self, entries: Entries) -> Result<()>;

    /// Retrieves a value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    /// Stores a value, overwriting any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Checks if a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Deletes a key. Returns `Ok(true)` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// Removes all entries, restoring configured defaults if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn clear(&mut self) -> Result<()>;
}

/// Opens backend instances for the worker.
///
/// Called once per worker spawn, including every respawn after a fault, so
/// every call must produce a backend over the same underlying store.
pub trait BackendFactory: Send + Sync + 'static {
    /// Opens a backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    fn open(&self) -> Result<Box<dyn Backend>>;

    /// Short description used in log lines
    fn describe(&self) -> String {
        "custom backend".to_string()
    }
}
