use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Insertion-ordered key/value mapping held by backends and the local cache
pub type Entries = IndexMap<String, Value>;

/// Build the plain object view of a set of entries
pub fn to_object(entries: &Entries) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Operations understood by the worker dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Return the full mapping
    Load,
    /// Atomically overwrite the full mapping
    Replace,
    Get,
    Set,
    Has,
    Delete,
    Clear,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Replace => "replace",
            Self::Get => "get",
            Self::Set => "set",
            Self::Has => "has",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Current local version
    pub version: u64,
    /// Number of times the plain view was rebuilt
    pub view_rebuilds: u64,
    /// Throttle windows opened by mutations; a burst inside one window counts once
    pub flushes_scheduled: u64,
    /// Full-state flushes sent to the worker
    pub flushes_sent: u64,
    /// Generation of the live worker (bumps on every respawn)
    pub worker_generation: u64,
}
