//! Thin caching façade around the Storage Engine: object (de)serialization,
//! the inline/file threshold policy, per-instance mutual exclusion, async
//! operation variants and a background trim task.
//!
//! This layer sits above the Storage Engine as an external collaborator
//! so the crate is directly usable: a mutex-guarded storage handle
//! wrapping every call, plus an async trim task with an explicit
//! shutdown signal rather than a timer with no way to stop it.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::cache::key::file_name_for_key;
use crate::config::CacheConfig;
use crate::engine::StorageEngine;
use crate::error::Result;

/// Sensor for free disk space at the cache root, injected by the caller.
/// Real OS-level sensing is out of scope for the engine's core; the
/// default implementation reports no pressure, i.e. "no limit".
pub trait FreeSpaceProvider: Send + Sync {
    fn free_bytes(&self, root: &Path) -> Option<u64>;
}

/// Default provider: never reports pressure.
pub struct NoFreeSpaceSensing;

impl FreeSpaceProvider for NoFreeSpaceSensing {
    fn free_bytes(&self, _root: &Path) -> Option<u64> {
        None
    }
}

struct Inner {
    engine: Mutex<StorageEngine>,
    config: CacheConfig,
    free_space: Box<dyn FreeSpaceProvider>,
}

/// A serializing, policy-enforcing handle onto a [`StorageEngine`].
///
/// Cheap to clone: internally an `Arc`, so every clone shares the same
/// underlying engine and mutex.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Open (or create) a cache at `config.root()` with the given config.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_free_space(config, Box::new(NoFreeSpaceSensing))
    }

    /// Open (or create) a cache at the platform cache directory under
    /// `app_name`, with every other setting at its default.
    pub fn open_default(app_name: &str) -> Result<Self> {
        Self::open(CacheConfig::new_in_default_cache_dir(app_name)?)
    }

    /// As [`Cache::open`], but with a custom free-disk-space sensor.
    pub fn open_with_free_space(
        config: CacheConfig,
        free_space: Box<dyn FreeSpaceProvider>,
    ) -> Result<Self> {
        let engine = StorageEngine::open(&config.root, config.mode, config.error_logs_enabled)?;
        Ok(Self {
            inner: Arc::new(Inner {
                engine: Mutex::new(engine),
                config,
                free_space,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StorageEngine> {
        self.inner.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file_name_if_external(&self, key: &str, serialized_len: usize) -> Option<String> {
        if matches!(self.inner.config.mode, crate::engine::CacheMode::Sql) {
            return None;
        }
        if serialized_len > self.inner.config.inline_threshold
            || matches!(self.inner.config.mode, crate::engine::CacheMode::File)
        {
            Some(file_name_for_key(key))
        } else {
            None
        }
    }

    // -- object API --------------------------------------------------

    pub fn contains_object(&self, key: &str) -> bool {
        self.lock().item_exists(key).unwrap_or(false)
    }

    pub fn object<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, Option<Vec<u8>>)>> {
        let Some(entry) = self.lock().item(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<T>(&entry.value) {
            Ok(obj) => Ok(Some((obj, entry.extended_data))),
            Err(e) => {
                log::warn!("failed to deserialize cached object for {key:?}: {e}");
                Ok(None)
            }
        }
    }

    pub fn set_object<T: Serialize>(
        &self,
        key: &str,
        obj: &T,
        extended: Option<&[u8]>,
    ) -> Result<()> {
        let bytes =
            serde_json::to_vec(obj).map_err(|e| crate::error::Error::Codec(e.to_string()))?;
        let file_name = self.file_name_if_external(key, bytes.len());
        self.lock()
            .save(key, &bytes, file_name.as_deref(), extended)
    }

    pub fn remove_object(&self, key: &str) -> Result<()> {
        self.lock().remove(key)
    }

    pub fn remove_all_objects(&self) -> Result<()> {
        self.lock().remove_all()
    }

    pub fn total_count(&self) -> Result<i64> {
        self.lock().items_count()
    }

    pub fn total_cost(&self) -> Result<i64> {
        self.lock().items_size()
    }

    pub fn trim_to_count(&self, n: i64) -> Result<()> {
        self.lock().remove_to_fit_count(n)
    }

    pub fn trim_to_cost(&self, n: i64) -> Result<()> {
        self.lock().remove_to_fit_size(n)
    }

    /// `cutoff` is an absolute unix timestamp; entries last accessed
    /// before it are evicted.
    pub fn trim_to_age(&self, cutoff: i64) -> Result<()> {
        self.lock().remove_earlier_than(cutoff)
    }

    fn trim_to_free_space(&self) -> Result<()> {
        let Some(min_free) = self.inner.config.limits.min_free_bytes else {
            return Ok(());
        };
        let Some(current) = self.inner.free_space.free_bytes(&self.inner.config.root) else {
            return Ok(());
        };
        if current >= min_free {
            return Ok(());
        }
        // No byte-level free-space accounting is available from the
        // engine; fall back to evicting the single oldest entry and
        // re-checking, bounded by the number of entries in the cache.
        let mut guard = self.lock();
        let mut remaining = guard.items_count()?;
        while remaining > 0 {
            if guard.remove_oldest(1)? == 0 {
                break;
            }
            remaining -= 1;
            match self.inner.free_space.free_bytes(&self.inner.config.root) {
                Some(free) if free >= min_free => break,
                None => break,
                _ => continue,
            }
        }
        Ok(())
    }

    /// Run one trim pass in the order cost → count → age → free-disk.
    pub fn trim_once(&self) -> Result<()> {
        if let Some(max_cost) = self.inner.config.limits.max_cost_bytes {
            self.trim_to_cost(max_cost)?;
        }
        if let Some(max_count) = self.inner.config.limits.max_count {
            self.trim_to_count(max_count)?;
        }
        if let Some(max_age) = self.inner.config.limits.max_age_secs {
            let cutoff = crate::index::now_secs() - max_age;
            self.trim_to_age(cutoff)?;
        }
        self.trim_to_free_space()?;
        Ok(())
    }

    // -- async variants ------------------------------------------------

    pub async fn contains_object_async(&self, key: &str) -> bool {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.contains_object(&key))
            .await
            .unwrap_or(false)
    }

    pub async fn object_async<T: DeserializeOwned + Send + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<(T, Option<Vec<u8>>)>> {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.object::<T>(&key))
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?
    }

    pub async fn set_object_async<T: Serialize + Send + 'static>(
        &self,
        key: &str,
        obj: T,
        extended: Option<Vec<u8>>,
    ) -> Result<()> {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.set_object(&key, &obj, extended.as_deref()))
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?
    }

    pub async fn remove_object_async(&self, key: &str) -> Result<()> {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.remove_object(&key))
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?
    }

    pub async fn remove_all_objects_async(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.remove_all_objects())
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?
    }

    /// Spawn the periodic trim task (default interval from `config`),
    /// returning a handle whose `shutdown()` stops it. Dropping the
    /// handle without calling `shutdown()` also stops the task, since
    /// dropping the sender closes the watch channel the loop selects on.
    pub fn spawn_auto_trim(&self) -> TrimHandle {
        let (tx, mut rx) = watch::channel(false);
        let this = self.clone();
        let interval = self.inner.config.trim_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let this = this.clone();
                        let _ = tokio::task::spawn_blocking(move || {
                            if let Err(e) = this.trim_once() {
                                log::warn!("auto-trim pass failed: {e}");
                            }
                        }).await;
                    }
                    _ = rx.changed() => break,
                }
            }
        });
        TrimHandle { _shutdown: tx }
    }
}

/// Handle for the background trim task spawned by [`Cache::spawn_auto_trim`].
pub struct TrimHandle {
    _shutdown: watch::Sender<bool>,
}

impl TrimHandle {
    /// Signal the trim task to stop. The task observes this on its next
    /// wakeup and exits; this method does not block on that exit.
    pub fn shutdown(self) {
        let _ = self._shutdown.send(true);
    }
}
