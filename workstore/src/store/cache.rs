use crate::core::{Entries, Result, StoreError, to_object};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Controller-side replica of the backend contents.
///
/// Absent until the first load. Mutations bump `version` only when they
/// change something; the plain view is rebuilt lazily when it is older than
/// the current version.
pub struct LocalCache {
    entries: Option<Entries>,
    version: u64,
    view: Arc<Map<String, Value>>,
    view_version: Option<u64>,
    rebuilds: u64,
}

impl LocalCache {
    pub fn new() -> Self {
        Self {
            entries: None,
            version: 0,
            view: Arc::new(Map::new()),
            view_version: None,
            rebuilds: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// Install the mapping fetched from the worker
    pub fn load(&mut self, entries: Entries) {
        self.entries = Some(entries);
        self.view_version = None;
    }

    /// Forget the replica; later reads fail as uninitialized
    pub fn detach(&mut self) {
        self.entries = None;
        self.view = Arc::new(Map::new());
        self.view_version = None;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn entries(&self) -> Result<&Entries> {
        self.entries.as_ref().ok_or(StoreError::Uninitialized)
    }

    fn entries_mut(&mut self) -> Result<&mut Entries> {
        self.entries.as_mut().ok_or(StoreError::Uninitialized)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(self.entries()?.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// Full copy for a flush
    pub fn snapshot(&self) -> Result<Entries> {
        self.entries().cloned()
    }

    pub fn set(&mut self, key: String, value: Value) -> Result<()> {
        self.entries_mut()?.insert(key, value);
        self.version += 1;
        Ok(())
    }

    /// Insert every pair; returns false (and keeps the version) if empty
    pub fn set_many<I>(&mut self, pairs: I) -> Result<bool>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let entries = self.entries_mut()?;
        let mut changed = false;
        for (key, value) in pairs {
            entries.insert(key, value);
            changed = true;
        }
        if changed {
            self.version += 1;
        }
        Ok(changed)
    }

    /// Remove `key`; the version only moves if it was present
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let removed = self.entries_mut()?.shift_remove(key).is_some();
        if removed {
            self.version += 1;
        }
        Ok(removed)
    }

    /// Remove everything; the version only moves if anything was present
    pub fn clear(&mut self) -> Result<bool> {
        let entries = self.entries_mut()?;
        if entries.is_empty() {
            return Ok(false);
        }
        entries.clear();
        self.version += 1;
        Ok(true)
    }

    /// Whether the current view reflects the current version
    pub fn view_is_fresh(&self) -> bool {
        self.entries.is_some() && self.view_version == Some(self.version)
    }

    /// The view as last built
    pub fn view(&self) -> Arc<Map<String, Value>> {
        Arc::clone(&self.view)
    }

    /// Return the view, rebuilding it first if it is stale
    pub fn fresh_view(&mut self) -> Result<Arc<Map<String, Value>>> {
        if !self.view_is_fresh() {
            let view = to_object(self.entries()?);
            self.view = Arc::new(view);
            self.view_version = Some(self.version);
            self.rebuilds += 1;
        }
        Ok(self.view())
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loaded() -> LocalCache {
        let mut cache = LocalCache::new();
        cache.load(Entries::new());
        cache
    }

    #[test]
    fn test_unloaded_cache_is_uninitialized() {
        let mut cache = LocalCache::new();
        assert!(matches!(cache.get("a"), Err(StoreError::Uninitialized)));
        assert!(matches!(
            cache.set("a".to_string(), json!(1)),
            Err(StoreError::Uninitialized)
        ));
        assert!(matches!(cache.fresh_view(), Err(StoreError::Uninitialized)));
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn test_absent_delete_keeps_version() {
        let mut cache = loaded();
        cache.set("a".to_string(), json!(1)).unwrap();
        assert_eq!(cache.version(), 1);

        assert!(!cache.delete("missing").unwrap());
        assert_eq!(cache.version(), 1);

        assert!(cache.delete("a").unwrap());
        assert_eq!(cache.version(), 2);

        assert!(!cache.clear().unwrap());
        assert_eq!(cache.version(), 2);
    }

    #[test]
    fn test_view_rebuilt_once_per_version() {
        let mut cache = loaded();
        cache.set("b".to_string(), json!(2)).unwrap();
        cache.set("a".to_string(), json!(1)).unwrap();

        let first = cache.fresh_view().unwrap();
        let second = cache.fresh_view().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.rebuilds(), 1);
        assert_eq!(
            first.keys().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "a".to_string()]
        );

        cache.set("c".to_string(), json!(3)).unwrap();
        assert!(!cache.view_is_fresh());
        let third = cache.fresh_view().unwrap();
        assert_eq!(cache.rebuilds(), 2);
        assert_eq!(Value::Object((*third).clone()), json!({"b": 2, "a": 1, "c": 3}));
    }

    #[test]
    fn test_set_many_bumps_version_once() {
        let mut cache = loaded();
        let changed = cache
            .set_many(vec![
                ("x".to_string(), json!(true)),
                ("y".to_string(), json!(null)),
            ])
            .unwrap();
        assert!(changed);
        assert_eq!(cache.version(), 1);
        assert!(!cache.set_many(Vec::new()).unwrap());
        assert_eq!(cache.version(), 1);
    }
}
