//! Process-local TTL cache.
//!
//! Backed by moka with a per-entry expiry, so each `set` can choose its own
//! lifetime. Expired entries are never returned. A periodic sweeper drops
//! entries that are set once and never read again.
//!
//! The cache is not shared between processes; every instance of the bot
//! has its own.

use moka::future::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Lifetime used by callers that have no better idea.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    ttl: Duration,
}

/// Expiry driven by the ttl stored next to each value.
struct PerEntryTtl;

impl<V> Expiry<String, CacheEntry<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    // overwrites restart the clock with the new ttl
    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Hit/miss counters plus the current entry count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// String-keyed cache where every entry carries its own ttl.
pub struct TtlCache<V> {
    name: String,
    cache: Cache<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        let cache = Cache::builder().expire_after(PerEntryTtl).build();

        Self {
            name: name.into(),
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored value, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` for `ttl`, replacing any existing entry.
    ///
    /// A zero ttl removes the key instead.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        if ttl.is_zero() {
            self.cache.invalidate(&key).await;
            return;
        }
        self.cache.insert(key, CacheEntry { value, ttl }).await;
    }

    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Return the cached value or compute, store and return a fresh one.
    ///
    /// Errors from `init` are passed through and nothing is cached.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        init: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = init().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Start the periodic expiry sweep. Calling it again is a no-op while
    /// a sweeper is running.
    pub fn start_sweeper(&self, interval: Duration) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let cache = self.cache.clone();
        let name = self.name.clone();
        let interval = interval.max(Duration::from_millis(10));
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.run_pending_tasks().await;
                tracing::trace!(cache = %name, entries = cache.entry_count(), "Cache sweep");
            }
        }));
        tracing::debug!(cache = %self.name, interval_ms = interval.as_millis() as u64, "Cache sweeper started");
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the sweeper and drop all entries.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.clear().await;
        tracing::debug!(cache = %self.name, "Cache shut down");
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.cache.entry_count(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
