//! In-process cache with TTL expiry and a capacity bound.
//!
//! # Architecture
//!
//! ```text
//! MemoryCache ──owns──▶ Arc<Inner> ◀──weak── sweeper task (tokio::spawn)
//!                           │
//!                RwLock<HashMap<String, Entry>>
//! ```
//!
//! Expired entries are removed two ways: lazily when a `get` finds one, and
//! in bulk by a background sweeper that runs every `cleanup_interval`. The
//! sweeper holds only a weak reference and also watches a cancellation
//! token, so [`MemoryCache::close`] or dropping the cache stops it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use toolpipe_core::RequestContext;

use crate::cache::{Cache, CacheFuture};
use crate::error::CacheError;
use crate::stats::{CacheStats, StatsCounter};

// ── Configuration ────────────────────────────────────────────────────

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Maximum number of live entries. Zero means unbounded.
    pub max_size: usize,
    /// TTL applied when `set` is called with a zero TTL. Zero means never
    /// expire.
    pub default_ttl: Duration,
    /// How often the sweeper removes expired entries. Zero disables it.
    pub cleanup_interval: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// ── Entry ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
    /// Insertion sequence number, lower is older.
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    next_seq: AtomicU64,
    stats: StatsCounter,
    config: MemoryCacheConfig,
}

impl Inner {
    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        self.stats.evicted(removed as u64);
        removed
    }
}

// ── MemoryCache ──────────────────────────────────────────────────────

/// A [`Cache`] stored in process memory.
///
/// Share it behind an `Arc`. It is not `Clone`: dropping it stops the
/// sweeper.
///
/// # Capacity
///
/// When `max_size` is non-zero and a `set` of a new key would exceed it, the
/// cache first drops expired entries, then the oldest-inserted ones, until
/// there is room. The number of live entries never exceeds `max_size`.
pub struct MemoryCache {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .field("config", &self.inner.config)
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl MemoryCache {
    /// Creates a cache and, when called inside a tokio runtime, starts the
    /// sweeper.
    pub fn new(config: MemoryCacheConfig) -> Self {
        let interval = config.cleanup_interval;
        let inner = Arc::new(Inner {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            stats: StatsCounter::default(),
            config,
        });
        let shutdown = CancellationToken::new();

        if !interval.is_zero() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(sweep(Arc::downgrade(&inner), shutdown.clone(), interval));
                }
                Err(_) => {
                    tracing::debug!("no tokio runtime, expired entries are only removed lazily");
                }
            }
        }

        Self { inner, shutdown }
    }

    /// Stops the sweeper. Entries stay readable.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Removes every expired entry now, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// The configuration in use.
    pub fn config(&self) -> &MemoryCacheConfig {
        &self.inner.config
    }

    fn get_now(&self, key: &str) -> Result<Value, CacheError> {
        {
            let entries = self.inner.entries.read();
            match entries.get(key) {
                None => {
                    self.inner.stats.miss();
                    return Err(CacheError::Miss);
                }
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    self.inner.stats.hit();
                    return Ok(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a writer may have replaced the
        // entry between the two locks.
        let mut entries = self.inner.entries.write();
        if entries
            .get(key)
            .is_some_and(|e| e.is_expired(Instant::now()))
        {
            entries.remove(key);
            self.inner.stats.evicted(1);
        }
        self.inner.stats.miss();
        Err(CacheError::Miss)
    }

    fn set_now(&self, key: &str, value: Value, ttl: Duration) {
        let ttl = if ttl.is_zero() {
            self.inner.config.default_ttl
        } else {
            ttl
        };
        let now = Instant::now();
        // A TTL too large to represent never expires.
        let expires_at = if ttl.is_zero() {
            None
        } else {
            now.checked_add(ttl)
        };
        let max_size = self.inner.config.max_size;

        let mut entries = self.inner.entries.write();
        // Taken under the lock so sequence order matches insertion order.
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        if max_size > 0 && !entries.contains_key(key) && entries.len() >= max_size {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            let mut evicted = before - entries.len();

            while entries.len() >= max_size {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone());
                let Some(oldest) = oldest else { break };
                entries.remove(&oldest);
                evicted += 1;
            }
            self.inner.stats.evicted(evicted as u64);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
        self.inner.stats.set();
    }

    fn delete_now(&self, key: &str) {
        if self.inner.entries.write().remove(key).is_some() {
            self.inner.stats.deleted();
        }
    }

    fn live_entry<T>(&self, key: &str, f: impl FnOnce(&Entry, Instant) -> T) -> Option<T> {
        let now = Instant::now();
        self.inner
            .entries
            .read()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| f(e, now))
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep(inner: Weak<Inner>, shutdown: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let removed = inner.evict_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired cache entries");
                }
            }
        }
    }
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, _ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Value> {
        Box::pin(future::ready(self.get_now(key)))
    }

    fn set<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        key: &'a str,
        value: Value,
        ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        self.set_now(key, value, ttl);
        Box::pin(future::ready(Ok(())))
    }

    fn delete<'a>(&'a self, _ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, ()> {
        self.delete_now(key);
        Box::pin(future::ready(Ok(())))
    }

    fn clear<'a>(&'a self, _ctx: &'a RequestContext) -> CacheFuture<'a, ()> {
        self.inner.entries.write().clear();
        Box::pin(future::ready(Ok(())))
    }

    fn exists<'a>(&'a self, _ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, bool> {
        let found = self.live_entry(key, |_, _| ()).is_some();
        Box::pin(future::ready(Ok(found)))
    }

    fn ttl<'a>(&'a self, _ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Duration> {
        let remaining = self
            .live_entry(key, |e, now| {
                e.expires_at
                    .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
            })
            .unwrap_or(Duration::ZERO);
        Box::pin(future::ready(Ok(remaining)))
    }

    fn stats(&self) -> CacheStats {
        let max_size = self.inner.config.max_size;
        self.inner
            .stats
            .snapshot(self.len(), (max_size > 0).then_some(max_size))
    }

    fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(max_size: usize, default_ttl: Duration) -> MemoryCacheConfig {
        MemoryCacheConfig {
            max_size,
            default_ttl,
            cleanup_interval: Duration::ZERO,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    #[tokio::test]
    async fn ttl_round_trip() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();

        cache
            .set(&ctx, "k", json!({"v": 1}), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!({"v": 1}));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&ctx, "k").await.unwrap_err().is_miss());
        assert!(cache.is_empty(), "lazy expiry removes the entry");
    }

    #[tokio::test]
    async fn zero_default_ttl_never_expires() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "k", json!("forever"), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!("forever"));
        assert_eq!(cache.ttl(&ctx, "k").await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_ttl_uses_default() {
        let cache = MemoryCache::new(config(0, Duration::from_secs(60)));
        let ctx = ctx();

        cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
        let remaining = cache.ttl(&ctx, "k").await.unwrap();
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn overwrite_replaces_value_and_expiration() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "k", json!(1), Duration::from_millis(20)).await.unwrap();
        cache.set(&ctx, "k", json!(2), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
        cache.delete(&ctx, "k").await.unwrap();
        assert!(!cache.exists(&ctx, "k").await.unwrap());
        cache.delete(&ctx, "k").await.unwrap();
        cache.delete(&ctx, "never-set").await.unwrap();
        assert_eq!(cache.stats().deletes, 1);
    }

    #[tokio::test]
    async fn stats_hit_rate() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();
        assert_eq!(cache.stats().hit_rate(), 0.0);

        for i in 0..4 {
            cache.set(&ctx, &format!("k{i}"), json!(i), Duration::ZERO).await.unwrap();
        }
        for i in 0..3 {
            cache.get(&ctx, &format!("k{i}")).await.unwrap();
        }
        let _ = cache.get(&ctx, "absent").await;

        let stats = cache.stats();
        assert_eq!(stats.sets, 4);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 4);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);

        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().size, 4);
    }

    #[tokio::test]
    async fn capacity_of_two_evicts() {
        let cache = MemoryCache::new(config(2, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "b", json!(2), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "c", json!(3), Duration::ZERO).await.unwrap();

        let stats = cache.stats();
        assert!(stats.size <= 2);
        assert!(stats.evictions >= 1);
        assert_eq!(stats.max_size, Some(2));
        assert_eq!(cache.get(&ctx, "c").await.unwrap(), json!(3));
        assert!(!cache.exists(&ctx, "a").await.unwrap(), "oldest goes first");
    }

    #[tokio::test]
    async fn capacity_prefers_expired_entries() {
        let cache = MemoryCache::new(config(2, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "keep", json!(1), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "stale", json!(2), Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        cache.set(&ctx, "new", json!(3), Duration::ZERO).await.unwrap();

        assert!(cache.exists(&ctx, "keep").await.unwrap());
        assert!(cache.exists(&ctx, "new").await.unwrap());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn overwrite_at_capacity_does_not_evict() {
        let cache = MemoryCache::new(config(2, Duration::ZERO));
        let ctx = ctx();

        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "b", json!(2), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "a", json!(10), Duration::ZERO).await.unwrap();

        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&ctx, "b").await.unwrap(), json!(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_respect_capacity() {
        let cache = Arc::new(MemoryCache::new(config(8, Duration::ZERO)));
        let tasks = (0..64).map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let ctx = RequestContext::new();
                cache.set(&ctx, &format!("k{i}"), json!(i), Duration::ZERO).await
            })
        });
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }
        assert!(cache.len() <= 8);
        assert_eq!(cache.stats().evictions, 56);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            max_size: 0,
            default_ttl: Duration::from_millis(5),
            cleanup_interval: Duration::from_millis(10),
        });
        let ctx = ctx();

        for key in ["a", "b", "c"] {
            cache.set(&ctx, key, json!(key), Duration::ZERO).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 3);
    }

    #[tokio::test]
    async fn close_stops_sweeper() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            max_size: 0,
            default_ttl: Duration::from_millis(5),
            cleanup_interval: Duration::from_millis(10),
        });
        let ctx = ctx();
        cache.close();
        assert!(cache.is_closed());

        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.len(), 1, "expired entry stays until looked up");
        assert!(cache.get(&ctx, "a").await.unwrap_err().is_miss());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn works_without_runtime() {
        let cache = MemoryCache::default();
        assert!(cache.is_empty());
        assert_eq!(cache.evict_expired(), 0);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();
        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "b", json!(2), Duration::ZERO).await.unwrap();
        cache.clear(&ctx).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let cache = MemoryCache::new(config(0, Duration::ZERO));
        let ctx = ctx();

        cache
            .set(&ctx, "k", json!(1), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!(1));
        assert_eq!(cache.ttl(&ctx, "k").await.unwrap(), Duration::ZERO);

        let defaulted = MemoryCache::new(config(0, Duration::from_secs(u64::MAX)));
        defaulted.set(&ctx, "k", json!(2), Duration::ZERO).await.unwrap();
        assert_eq!(defaulted.get(&ctx, "k").await.unwrap(), json!(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lazy_expiry_never_drops_a_fresh_overwrite() {
        let cache = Arc::new(MemoryCache::new(config(0, Duration::ZERO)));

        for round in 0..40 {
            let ctx = ctx();
            cache
                .set(&ctx, "hot", json!("stale"), Duration::from_millis(1))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;

            let readers = (0..8).map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let ctx = RequestContext::new();
                    for _ in 0..20 {
                        if let Ok(value) = cache.get(&ctx, "hot").await {
                            assert_ne!(value, json!("stale"), "expired value served");
                        }
                    }
                })
            });
            let writer = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let ctx = RequestContext::new();
                    cache.delete(&ctx, "hot").await.unwrap();
                    cache
                        .set(&ctx, "hot", json!(format!("fresh-{round}")), Duration::ZERO)
                        .await
                        .unwrap();
                })
            };

            for task in futures::future::join_all(readers).await {
                task.unwrap();
            }
            writer.await.unwrap();

            assert_eq!(
                cache.get(&ctx, "hot").await.unwrap(),
                json!(format!("fresh-{round}"))
            );
        }
    }

    #[tokio::test]
    async fn capacity_evicts_in_insertion_order() {
        let cache = MemoryCache::new(config(2, Duration::ZERO));
        let ctx = ctx();

        for key in ["a", "b", "c", "d"] {
            cache.set(&ctx, key, json!(key), Duration::ZERO).await.unwrap();
        }
        assert!(!cache.exists(&ctx, "a").await.unwrap());
        assert!(!cache.exists(&ctx, "b").await.unwrap());
        assert!(cache.exists(&ctx, "c").await.unwrap());
        assert!(cache.exists(&ctx, "d").await.unwrap());
    }
}
