//! Controller facade.
//!
//! [`Store`] answers reads from a local replica and persists through the
//! worker. Mutations update the replica, bump its version and arm the flush
//! throttle; a flush always sends the whole replica as one `replace`.
//!
//! ```ignore
//! let store = Store::open(StoreConfig::new("settings")).await?;
//! store.set("theme", json!("dark"))?;
//! store.save().await?;
//! store.destroy().await?;
//! ```

mod cache;
mod throttle;


pub use cache::LocalCache;
pub use throttle::Throttle;

use crate::backend::{BackendFactory, FileBackendFactory};
use crate::bridge::{AsyncBridge, PendingCalls, PendingReply, SyncBridge};
use crate::config::StoreConfig;
use crate::core::{Entries, Method, Result, StoreError, StoreStats};
use crate::worker::{Supervisor, WorkerState};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

struct StoreInner {
    name: String,
    supervisor: Arc<Supervisor>,
    async_bridge: AsyncBridge,
    sync_bridge: SyncBridge,
    cache: RwLock<LocalCache>,
    throttle: Throttle,
    /// Held from snapshot to post so replaces reach the worker in snapshot order
    flush: Mutex<()>,
    terminated: AtomicBool,
    flushes_scheduled: AtomicU64,
    flushes_sent: AtomicU64,
}

/// Key-value store persisted through a supervised worker
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Store over the JSON file described by `config`; call `init` before use
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let factory = FileBackendFactory::from_config(&config);
        Self::with_backend(config, Arc::new(factory))
    }

    /// Store over a custom backend; call `init` before use
    pub fn with_backend(config: StoreConfig, factory: Arc<dyn BackendFactory>) -> Result<Self> {
        config.validate()?;

        let pending = Arc::new(PendingCalls::new());
        let supervisor = Arc::new(Supervisor::spawn(factory, pending.clone())?);

        let inner = Arc::new(StoreInner {
            name: config.name.clone(),
            async_bridge: AsyncBridge::new(Arc::clone(&supervisor), pending),
            sync_bridge: SyncBridge::new(Arc::clone(&supervisor), config.sync_region_bytes),
            supervisor,
            cache: RwLock::new(LocalCache::new()),
            throttle: Throttle::new(config.save_throttle()),
            flush: Mutex::new(()),
            terminated: AtomicBool::new(false),
            flushes_scheduled: AtomicU64::new(0),
            flushes_sent: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        inner.throttle.start(&config.name, move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush_throttled();
            }
        })?;

        debug!(
            "Store '{}' created (throttle {:?}, sync region {} bytes)",
            config.name,
            config.save_throttle(),
            config.sync_region_bytes
        );

        Ok(Self { inner })
    }

    /// Create and initialize a file-backed store
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.init().await?;
        Ok(store)
    }

    /// Blocking counterpart of [`Store::open`]
    pub fn open_sync(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.init_sync()?;
        Ok(store)
    }

    /// Store name from the configuration
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Load the backend contents into the local cache. Idempotent.
    pub async fn init(&self) -> Result<()> {
        self.ensure_live()?;
        if self.is_initialized() {
            return Ok(());
        }

        let loaded = self.inner.async_bridge.call(Method::Load, Vec::new()).await?;
        self.install(loaded)
    }

    /// Blocking counterpart of [`Store::init`]
    pub fn init_sync(&self) -> Result<()> {
        self.ensure_live()?;
        if self.is_initialized() {
            return Ok(());
        }

        let loaded = self.inner.sync_bridge.call(Method::Load, Vec::new())?;
        self.install(loaded)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.cache.read().is_loaded()
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_live()?;
        self.inner.cache.read().get(key)
    }

    /// Value for `key`, or `default` when absent
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.ensure_live()?;
        self.inner.cache.read().has(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.ensure_live()?;
        self.inner.cache.write().set(key.into(), value)?;
        self.inner.schedule_flush();
        Ok(())
    }

    /// Insert every pair with a single version bump
    pub fn set_many<K, I>(&self, pairs: I) -> Result<()>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.ensure_live()?;
        let changed = self
            .inner
            .cache
            .write()
            .set_many(pairs.into_iter().map(|(k, v)| (k.into(), v)))?;
        if changed {
            self.inner.schedule_flush();
        }
        Ok(())
    }

    /// Remove `key`. Returns true if it was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_live()?;
        let removed = self.inner.cache.write().delete(key)?;
        if removed {
            self.inner.schedule_flush();
        }
        Ok(removed)
    }

    /// Remove every key
    pub fn clear(&self) -> Result<()> {
        self.ensure_live()?;
        if self.inner.cache.write().clear()? {
            self.inner.schedule_flush();
        }
        Ok(())
    }

    /// Plain view of all entries, shared until the next mutation
    pub fn store(&self) -> Result<Arc<Map<String, Value>>> {
        self.ensure_live()?;

        let cache = self.inner.cache.upgradable_read();
        if cache.view_is_fresh() {
            return Ok(cache.view());
        }

        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        let view = cache.fresh_view()?;
        debug!(
            "Rebuilt view of '{}' at version {}",
            self.inner.name,
            cache.version()
        );
        Ok(view)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.ensure_live()?;
        self.inner.cache.read().keys()
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        self.ensure_live()?;
        self.inner.cache.read().values()
    }

    pub fn len(&self) -> Result<usize> {
        self.ensure_live()?;
        self.inner.cache.read().len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current local version
    pub fn version(&self) -> u64 {
        self.inner.cache.read().version()
    }

    pub fn stats(&self) -> StoreStats {
        let cache = self.inner.cache.read();
        StoreStats {
            version: cache.version(),
            view_rebuilds: cache.rebuilds(),
            flushes_scheduled: self.inner.flushes_scheduled.load(Ordering::Relaxed),
            flushes_sent: self.inner.flushes_sent.load(Ordering::Relaxed),
            worker_generation: self.inner.supervisor.generation(),
        }
    }

    /// Flush the full cache now, bypassing the throttle.
    ///
    /// The request is sent before this returns; awaiting only waits for the
    /// worker's acknowledgment.
    pub fn save(&self) -> impl Future<Output = Result<()>> + Send + use<> {
        let sent = self
            .ensure_live()
            .and_then(|()| self.inner.flush_now());
        async move {
            sent?.await?;
            Ok(())
        }
    }

    /// Blocking counterpart of [`Store::save`]
    pub fn save_sync(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.throttle.cancel();
        self.inner.replace_sync()
    }

    /// Flush pending changes and shut the worker down for good.
    ///
    /// Safe to call on a store that was never initialized, and more than
    /// once. Every other operation fails with `Terminated` afterwards.
    pub async fn destroy(&self) -> Result<()> {
        if !self.inner.begin_teardown() {
            return Ok(());
        }

        let result = match self.inner.final_flush() {
            Some(Ok(reply)) => reply.await.map(|_| ()),
            Some(Err(e)) => Err(e),
            None => Ok(()),
        };

        self.inner.finish_teardown(result)
    }

    /// Blocking counterpart of [`Store::destroy`]
    pub fn destroy_sync(&self) -> Result<()> {
        if !self.inner.begin_teardown() {
            return Ok(());
        }

        let result = match self.inner.replace_sync() {
            Err(StoreError::Uninitialized) => Ok(()),
            other => other,
        };

        self.inner.finish_teardown(result)
    }

    /// Force the worker to exit as if it crashed; a replacement is spawned.
    ///
    /// Returns the generation that was killed.
    pub fn kill_worker(&self) -> Result<u64> {
        self.ensure_live()?;
        self.inner.supervisor.kill_worker()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.inner.supervisor.state()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(StoreError::Terminated);
        }
        Ok(())
    }

    fn install(&self, loaded: Value) -> Result<()> {
        let entries: Entries = match loaded {
            Value::Object(map) => map.into_iter().collect(),
            other => {
                return Err(StoreError::Decode(format!(
                    "load returned a non-object value: {}",
                    other
                )));
            }
        };

        let mut cache = self.inner.cache.write();
        if !cache.is_loaded() {
            info!(
                "Store '{}' initialized with {} keys",
                self.inner.name,
                entries.len()
            );
            cache.load(entries);
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.inner.terminated.swap(true, Ordering::AcqRel) {
            if self.inner.throttle.cancel() {
                debug!("Store '{}' dropped with a pending flush", self.inner.name);
                if let Err(e) = self.inner.dispatch_replace() {
                    warn!("Store '{}' lost its pending flush: {}", self.inner.name, e);
                }
            }
            self.inner.supervisor.terminate();
        }
    }
}

impl StoreInner {
    fn schedule_flush(&self) {
        if self.throttle.schedule() {
            self.flushes_scheduled.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Flush of '{}' scheduled in {:?}",
                self.name,
                self.throttle.interval()
            );
        }
    }

    /// Send the current snapshot as a `replace`
    fn dispatch_replace(&self) -> Result<PendingReply> {
        let _flush = self.flush.lock();
        self.post_snapshot()
    }

    /// Blocking `replace` of the current snapshot, answered by the worker
    fn replace_sync(&self) -> Result<()> {
        let _flush = self.flush.lock();
        let snapshot = self.cache.read().snapshot()?;
        self.flushes_sent.fetch_add(1, Ordering::Relaxed);
        self.sync_bridge
            .call(Method::Replace, vec![entries_value(snapshot)])?;
        Ok(())
    }

    // Caller holds `flush`
    fn post_snapshot(&self) -> Result<PendingReply> {
        let snapshot = self.cache.read().snapshot()?;
        let reply = self
            .async_bridge
            .dispatch(Method::Replace, vec![entries_value(snapshot)])?;
        self.flushes_sent.fetch_add(1, Ordering::Relaxed);
        Ok(reply)
    }

    fn flush_now(&self) -> Result<PendingReply> {
        self.throttle.cancel();
        self.dispatch_replace()
    }

    /// Timer callback: the answer is not awaited, errors are logged by the
    /// bridge
    fn flush_throttled(&self) {
        let _flush = self.flush.lock();
        if self.terminated.load(Ordering::Acquire) {
            return;
        }

        match self.post_snapshot() {
            Ok(reply) => debug!("Throttled flush of '{}' sent (id={})", self.name, reply.id()),
            Err(StoreError::Uninitialized) => {}
            Err(e) => warn!("Throttled flush of '{}' failed: {}", self.name, e),
        }
    }

    /// Returns false if teardown already happened
    fn begin_teardown(&self) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.throttle.cancel();
        true
    }

    /// Replace request for teardown, `None` if there is nothing to flush
    fn final_flush(&self) -> Option<Result<PendingReply>> {
        match self.dispatch_replace() {
            Err(StoreError::Uninitialized) => None,
            other => Some(other),
        }
    }

    fn finish_teardown(&self, flushed: Result<()>) -> Result<()> {
        self.cache.write().detach();
        self.supervisor.terminate();

        match flushed {
            Ok(()) => {
                info!("Store '{}' destroyed", self.name);
                Ok(())
            }
            Err(e @ (StoreError::WorkerFault(_) | StoreError::Terminated)) => {
                warn!("Store '{}' destroyed without final flush: {}", self.name, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn entries_value(entries: Entries) -> Value {
    Value::Object(entries.into_iter().collect())
}
