use crate::core::{Entries, Result, StoreError};
use crate::worker::region::MIN_REGION_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default flush throttle window
pub const DEFAULT_SAVE_THROTTLE_MS: u64 = 10_000;

/// Default size of the reply region used by blocking calls (64 MiB)
pub const DEFAULT_SYNC_REGION_BYTES: usize = 64 * 1024 * 1024;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store name, used as the file stem
    pub name: String,
    /// Directory holding the store file
    pub directory: PathBuf,
    /// File extension without the dot
    pub file_extension: String,
    /// Values present until explicitly overwritten
    pub defaults: Entries,
    /// Minimum delay between two background flushes
    pub save_throttle_ms: u64,
    /// Reply region size for blocking calls, header included
    pub sync_region_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "config".to_string(),
            directory: PathBuf::from("./data"),
            file_extension: "json".to_string(),
            defaults: Entries::new(),
            save_throttle_ms: DEFAULT_SAVE_THROTTLE_MS,
            sync_region_bytes: DEFAULT_SYNC_REGION_BYTES,
        }
    }
}

impl StoreConfig {
    /// Create a configuration for the named store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the directory holding the store file
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Set the default values
    pub fn with_defaults(mut self, defaults: Entries) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the flush throttle window in milliseconds
    pub fn with_save_throttle_ms(mut self, millis: u64) -> Self {
        self.save_throttle_ms = millis;
        self
    }

    /// Set the reply region size for blocking calls
    pub fn with_sync_region_bytes(mut self, bytes: usize) -> Self {
        self.sync_region_bytes = bytes;
        self
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: StoreConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Full path of the store file
    pub fn store_path(&self) -> PathBuf {
        let file_name = if self.file_extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.file_extension)
        };
        self.directory.join(file_name)
    }

    /// Throttle window as a duration
    pub fn save_throttle(&self) -> Duration {
        Duration::from_millis(self.save_throttle_ms)
    }

    /// Check the values the core depends on
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Config("store name must not be empty".to_string()));
        }

        if self.name.contains(['/', '\\']) {
            return Err(StoreError::Config(format!(
                "store name must not contain path separators: {}",
                self.name
            )));
        }

        if self.sync_region_bytes < MIN_REGION_BYTES || self.sync_region_bytes > i32::MAX as usize
        {
            return Err(StoreError::Config(format!(
                "sync_region_bytes must be between {} and {}, got {}",
                MIN_REGION_BYTES,
                i32::MAX,
                self.sync_region_bytes
            )));
        }

        Ok(())
    }
}
