//! Result and metadata cache.
//!
//! Entries are stored as JSON `{value, created_at, ttl_secs}` with a matching
//! store-side expiry. Every key of a target lives under
//! [`Target::cache_namespace`], so invalidating one target is a prefix scan
//! that never touches another. All failures are fail-open: they are logged
//! and counted, and the caller sees a miss.
//!
//! Each target also carries a generation that [`CacheLayer::invalidate`]
//! bumps before it deletes anything. Read-through callers record it before
//! querying the backend and write back with [`CacheLayer::set_if_current`],
//! so results computed before a write can never outlive that write's
//! invalidation.

mod clock;
mod key;
mod redis;
mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CacheConfig, CacheStrategy};
use crate::metrics;
use crate::models::Target;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{CacheKey, CacheKeyBuilder};
pub use redis::RedisCacheStore;
pub use store::{CacheStore, MemoryCacheStore};

#[cfg(test)]
pub use store::MockCacheStore;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    created_at: DateTime<Utc>,
    ttl_secs: u64,
}

impl<T> CacheEntry<T> {
    fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64);
        self.created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Write-backs dropped because the target was invalidated meanwhile
    pub stale_writes: u64,
    pub hit_rate: f64,
}

pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    stale_writes: AtomicU64,
    generations: Mutex<HashMap<String, u64>>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// In-process cache sharing `clock` with its store.
    pub fn in_memory(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryCacheStore::with_clock(Arc::clone(&clock)));
        Self::new(store, config).with_clock(clock)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Start a fingerprint for a request against `target`.
    pub fn key(&self, target: &Target, kind: &'static str) -> CacheKeyBuilder {
        CacheKey::builder(
            target.cache_namespace(&self.config.key_prefix),
            kind,
            self.config.quantization_decimals,
        )
    }

    pub fn metadata_key(&self, target: &Target) -> CacheKey {
        CacheKey::fixed(&target.cache_namespace(&self.config.key_prefix), "meta")
    }

    /// Invalidation generation of `target`. Starts at 0.
    pub fn generation(&self, target: &Target) -> u64 {
        let namespace = target.cache_namespace(&self.config.key_prefix);
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&namespace)
            .copied()
            .unwrap_or(0)
    }

    fn bump_generation(&self, target: &Target) {
        let namespace = target.cache_namespace(&self.config.key_prefix);
        *self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(namespace)
            .or_insert(0) += 1;
    }

    fn fail_open(&self, op: &'static str, err: impl std::fmt::Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::cache_op(op, "error");
        warn!(op, error = %err, "Cache operation failed, continuing without cache");
    }

    fn miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::cache_op("get", "miss");
        None
    }

    /// Value stored under `key` if it has not expired.
    ///
    /// With the sliding strategy a hit rewrites the entry with a fresh window.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        let raw = match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.miss(),
            Err(err) => {
                self.fail_open("get", err);
                return None;
            }
        };

        let mut entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                self.fail_open("decode", err);
                return None;
            }
        };

        let now = self.clock.now();
        if now >= entry.expires_at() {
            return self.miss();
        }

        if self.config.strategy == CacheStrategy::Sliding {
            entry.created_at = now;
            match serde_json::to_string(&entry) {
                Ok(refreshed) => {
                    if let Err(err) = self
                        .store
                        .set_ex(key.as_str(), refreshed, entry.ttl_secs)
                        .await
                    {
                        self.fail_open("refresh", err);
                    }
                }
                Err(err) => self.fail_open("refresh", err),
            }
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::cache_op("get", "hit");
                Some(value)
            }
            Err(err) => {
                self.fail_open("decode", err);
                None
            }
        }
    }

    /// Store `value` for `ttl` (the configured default when `None`).
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }

        let ttl_secs = ttl.unwrap_or(self.config.default_ttl).as_secs().max(1);
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl_secs,
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(err) => return self.fail_open("encode", err),
        };

        if let Err(err) = self.store.set_ex(key.as_str(), encoded, ttl_secs).await {
            return self.fail_open("set", err);
        }
        metrics::cache_op("set", "ok");

        let sets = self.sets.fetch_add(1, Ordering::Relaxed) + 1;
        if sets % self.config.pressure_check_interval.max(1) == 0 {
            self.evict_pressure().await;
        }
    }

    /// Like [`set`](Self::set), but only while `target` is still at
    /// `generation`. Returns whether the entry was kept.
    ///
    /// The generation is checked again after the write: an invalidation that
    /// raced with it may have scanned the namespace before the entry landed,
    /// so the entry is removed here instead.
    pub async fn set_if_current<T: Serialize>(
        &self,
        target: &Target,
        generation: u64,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.generation(target) != generation {
            return self.skip_stale(target);
        }

        self.set(key, value, ttl).await;

        if self.generation(target) != generation {
            if let Err(err) = self.store.delete(&[key.as_str().to_string()]).await {
                self.fail_open("invalidate", err);
            }
            return self.skip_stale(target);
        }
        true
    }

    fn skip_stale(&self, target: &Target) -> bool {
        self.stale_writes.fetch_add(1, Ordering::Relaxed);
        metrics::cache_op("set", "stale");
        debug!(target = %target, "Dropped cache write-back after invalidation");
        false
    }

    /// Remove every entry derived from `target`. Other targets are untouched.
    pub async fn invalidate(&self, target: &Target) -> usize {
        if !self.config.enabled {
            return 0;
        }
        self.bump_generation(target);

        let pattern = format!("{}*", target.cache_namespace(&self.config.key_prefix));
        let keys = match self.store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                self.fail_open("invalidate", err);
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        match self.store.delete(&keys).await {
            Ok(removed) => {
                self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
                metrics::cache_evictions("invalidate", removed);
                debug!(target = %target, removed, "Invalidated cache entries");
                removed
            }
            Err(err) => {
                self.fail_open("invalidate", err);
                0
            }
        }
    }

    /// When the entry count reaches the pressure watermark, delete the 10%
    /// (at least one) of entries that expire soonest. Returns how many were
    /// removed.
    pub async fn evict_pressure(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let pattern = format!("{}:*", self.config.key_prefix);
        let keys = match self.store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                self.fail_open("evict", err);
                return 0;
            }
        };
        if keys.len() < self.config.pressure_watermark() {
            return 0;
        }

        let mut expiring: Vec<(DateTime<Utc>, String)> = Vec::with_capacity(keys.len());
        for key in keys {
            let expires_at = match self.store.get(&key).await {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry<serde_json::Value>>(&raw)
                    .map(|e| e.expires_at())
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                // Already gone
                Ok(None) => continue,
                Err(err) => {
                    self.fail_open("evict", err);
                    return 0;
                }
            };
            expiring.push((expires_at, key));
        }

        let count = (expiring.len() / 10).max(1);
        expiring.sort();
        let victims: Vec<String> = expiring.into_iter().take(count).map(|(_, k)| k).collect();

        match self.store.delete(&victims).await {
            Ok(removed) => {
                self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
                metrics::cache_evictions("pressure", removed);
                debug!(removed, "Evicted cache entries under pressure");
                removed
            }
            Err(err) => {
                self.fail_open("evict", err);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            enabled: self.config.enabled,
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorError;

    fn target(collection: &str) -> Target {
        Target::new("http://qdrant:6334", collection).unwrap()
    }

    fn layer(config: CacheConfig) -> (CacheLayer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (CacheLayer::in_memory(config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_fixed_ttl_boundary() {
        let (cache, clock) = layer(CacheConfig::default());
        let key = cache.key(&target("docs"), "search").limit(1).build();

        cache.set(&key, &vec![1, 2, 3], Some(Duration::from_secs(300))).await;

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get::<Vec<i32>>(&key).await, Some(vec![1, 2, 3]));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get::<Vec<i32>>(&key).await, None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_sliding_refreshes_window_on_hit() {
        let (sliding, clock) = layer(CacheConfig::default().with_strategy(CacheStrategy::Sliding));
        let key = sliding.key(&target("docs"), "search").limit(1).build();

        sliding.set(&key, &"v", Some(Duration::from_secs(100))).await;
        clock.advance(Duration::from_secs(90));
        assert_eq!(sliding.get::<String>(&key).await.as_deref(), Some("v"));
        clock.advance(Duration::from_secs(60));
        assert_eq!(sliding.get::<String>(&key).await.as_deref(), Some("v"));

        let (fixed, clock) = layer(CacheConfig::default());
        fixed.set(&key, &"v", Some(Duration::from_secs(100))).await;
        clock.advance(Duration::from_secs(90));
        assert!(fixed.get::<String>(&key).await.is_some());
        clock.advance(Duration::from_secs(60));
        assert!(fixed.get::<String>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_is_scoped_to_target() {
        let (cache, _) = layer(CacheConfig::default());
        let a = target("docs");
        let b = target("docs2");

        for i in 0..3 {
            cache.set(&cache.key(&a, "search").limit(i).build(), &i, None).await;
            cache.set(&cache.key(&b, "search").limit(i).build(), &i, None).await;
        }
        cache.set(&cache.metadata_key(&a), &"info", None).await;

        assert_eq!(cache.invalidate(&a).await, 4);
        for i in 0..3 {
            let key = cache.key(&b, "search").limit(i).build();
            assert_eq!(cache.get::<u32>(&key).await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_evict_pressure_removes_soonest_expiring() {
        let (cache, _) = layer(CacheConfig::default().with_capacity(10, 1000));
        let docs = target("docs");

        for i in 0..10u32 {
            let key = cache.key(&docs, "search").limit(i).build();
            cache
                .set(&key, &i, Some(Duration::from_secs(100 + u64::from(i) * 10)))
                .await;
        }

        assert_eq!(cache.evict_pressure().await, 1);
        let soonest = cache.key(&docs, "search").limit(0).build();
        assert_eq!(cache.get::<u32>(&soonest).await, None);
        let next = cache.key(&docs, "search").limit(1).build();
        assert_eq!(cache.get::<u32>(&next).await, Some(1));
    }

    #[tokio::test]
    async fn test_evict_pressure_below_watermark_is_noop() {
        let (cache, _) = layer(CacheConfig::default().with_capacity(100, 1000));
        cache.set(&cache.metadata_key(&target("docs")), &1, None).await;
        assert_eq!(cache.evict_pressure().await, 0);
    }

    #[tokio::test]
    async fn test_periodic_pressure_check_bounds_growth() {
        let (cache, _) = layer(CacheConfig::default().with_capacity(10, 5));
        let docs = target("docs");
        for i in 0..20u32 {
            cache.set(&cache.key(&docs, "search").limit(i).build(), &i, None).await;
        }
        assert!(cache.stats().evictions >= 1);
    }

    #[tokio::test]
    async fn test_store_errors_fail_open() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .returning(|_| Err(VectorError::Cache("connection reset".into())));
        store
            .expect_set_ex()
            .returning(|_, _, _| Err(VectorError::Cache("connection reset".into())));
        store
            .expect_keys()
            .returning(|_| Err(VectorError::Cache("connection reset".into())));

        let cache = CacheLayer::new(Arc::new(store), CacheConfig::default());
        let key = cache.key(&target("docs"), "search").build();

        assert_eq!(cache.get::<u32>(&key).await, None);
        cache.set(&key, &1u32, None).await;
        assert_eq!(cache.invalidate(&target("docs")).await, 0);
        assert_eq!(cache.stats().errors, 3);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_touches_store() {
        let cache = CacheLayer::new(Arc::new(MockCacheStore::new()), CacheConfig::disabled());
        let key = cache.key(&target("docs"), "search").build();

        cache.set(&key, &1u32, None).await;
        assert_eq!(cache.get::<u32>(&key).await, None);
        assert_eq!(cache.invalidate(&target("docs")).await, 0);
        assert!(!cache.stats().enabled);
    }

    #[tokio::test]
    async fn test_invalidate_bumps_generation_per_target() {
        let (cache, _) = layer(CacheConfig::default());
        let docs = target("docs");
        let other = target("other");

        assert_eq!(cache.generation(&docs), 0);
        cache.invalidate(&docs).await;
        cache.invalidate(&docs).await;
        assert_eq!(cache.generation(&docs), 2);
        assert_eq!(cache.generation(&other), 0);
    }

    #[tokio::test]
    async fn test_write_back_after_invalidation_is_dropped() {
        let (cache, _) = layer(CacheConfig::default());
        let docs = target("docs");
        let key = cache.key(&docs, "search").limit(3).build();

        let generation = cache.generation(&docs);
        cache.invalidate(&docs).await;

        assert!(!cache.set_if_current(&docs, generation, &key, &vec![1u32], None).await);
        assert_eq!(cache.get::<Vec<u32>>(&key).await, None);
        assert_eq!(cache.stats().stale_writes, 1);

        let generation = cache.generation(&docs);
        assert!(cache.set_if_current(&docs, generation, &key, &vec![2u32], None).await);
        assert_eq!(cache.get::<Vec<u32>>(&key).await, Some(vec![2]));
    }
}
