//! Cache backed by a remote key-value store.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use toolpipe_core::RequestContext;

use crate::cache::{Cache, CacheFuture};
use crate::error::{CacheError, KvError};
use crate::key::SEPARATOR;
use crate::kv::{KvClient, escape_glob};
use crate::stats::{CacheStats, StatsCounter};

/// Configuration for [`RemoteCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCacheConfig {
    /// Namespace prepended to every key as `prefix:key`. Empty means no
    /// namespace.
    pub prefix: String,
    /// TTL applied when `set` is called with a zero TTL. Zero means never
    /// expire.
    pub default_ttl: Duration,
}

/// A [`Cache`] whose entries live in a [`KvClient`].
///
/// Values are stored as JSON text. A stored string that is not valid JSON is
/// returned as a plain [`Value::String`] rather than an error.
///
/// Every operation races against the request context and fails with
/// [`CacheError::Cancelled`] if the context finishes first.
///
/// # Clearing
///
/// With a prefix, [`clear`](Cache::clear) lists `prefix:*` through
/// [`KvClient::keys`] and deletes the matches. A client that cannot list keys
/// makes `clear` fail with [`CacheError::Unsupported`].
///
/// **Without a prefix, `clear` calls [`KvClient::flush_all`] and wipes the
/// whole store**, including data that has nothing to do with this cache.
/// Always configure a prefix when the store is shared.
pub struct RemoteCache<C> {
    client: C,
    config: RemoteCacheConfig,
    stats: StatsCounter,
}

impl<C> fmt::Debug for RemoteCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: KvClient> RemoteCache<C> {
    /// Wraps `client`.
    pub fn new(client: C, config: RemoteCacheConfig) -> Self {
        Self {
            client,
            config,
            stats: StatsCounter::default(),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The configured namespace.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Closes the underlying client.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] if the client fails to close.
    pub async fn close(&self) -> Result<(), CacheError> {
        self.client.close().await.map_err(CacheError::from)
    }

    fn full_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{SEPARATOR}{key}", self.config.prefix)
        }
    }

    fn effective_ttl(&self, ttl: Duration) -> Option<Duration> {
        let ttl = if ttl.is_zero() {
            self.config.default_ttl
        } else {
            ttl
        };
        (!ttl.is_zero()).then_some(ttl)
    }

    async fn clear_prefix(&self) -> Result<(), KvError> {
        let pattern = format!("{}{SEPARATOR}*", escape_glob(&self.config.prefix));
        let keys = self.client.keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let removed = self.client.del(&keys).await?;
        tracing::debug!(prefix = %self.config.prefix, removed, "cleared remote cache namespace");
        Ok(())
    }
}

/// Runs `op` unless the context finishes first.
async fn guarded<T>(
    ctx: &RequestContext,
    op: impl Future<Output = Result<T, KvError>>,
) -> Result<T, CacheError> {
    tokio::select! {
        biased;
        cause = ctx.done() => Err(CacheError::Cancelled(cause)),
        result = op => result.map_err(CacheError::from),
    }
}

impl<C: KvClient> Cache for RemoteCache<C> {
    fn get<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Value> {
        Box::pin(async move {
            let full = self.full_key(key);
            match guarded(ctx, self.client.get(&full)).await? {
                Some(raw) => {
                    self.stats.hit();
                    Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
                }
                None => {
                    self.stats.miss();
                    Err(CacheError::Miss)
                }
            }
        })
    }

    fn set<'a>(
        &'a self,
        ctx: &'a RequestContext,
        key: &'a str,
        value: Value,
        ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let encoded = serde_json::to_string(&value)?;
            let full = self.full_key(key);
            let ttl = self.effective_ttl(ttl);
            guarded(ctx, self.client.set(&full, encoded, ttl)).await?;
            self.stats.set();
            Ok(())
        })
    }

    fn delete<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let keys = [self.full_key(key)];
            if guarded(ctx, self.client.del(&keys)).await? > 0 {
                self.stats.deleted();
            }
            Ok(())
        })
    }

    fn clear<'a>(&'a self, ctx: &'a RequestContext) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            if self.config.prefix.is_empty() {
                tracing::warn!("clearing remote cache without a prefix flushes the entire store");
                return guarded(ctx, self.client.flush_all()).await;
            }
            match guarded(ctx, self.clear_prefix()).await {
                Err(CacheError::Remote(KvError::Unsupported(op))) => {
                    Err(CacheError::Unsupported(format!(
                        "clearing prefix '{}' needs key enumeration, client lacks '{op}'",
                        self.config.prefix
                    )))
                }
                other => other,
            }
        })
    }

    fn exists<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            let keys = [self.full_key(key)];
            Ok(guarded(ctx, self.client.exists(&keys)).await? > 0)
        })
    }

    fn ttl<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Duration> {
        Box::pin(async move {
            let full = self.full_key(key);
            Ok(guarded(ctx, self.client.ttl(&full))
                .await?
                .unwrap_or(Duration::ZERO))
        })
    }

    /// Counters only; `size` is always zero because counting remote keys
    /// would need a scan.
    fn stats(&self) -> CacheStats {
        self.stats.snapshot(0, None)
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKvClient;
    use serde_json::json;
    use toolpipe_core::ContextError;

    fn cache(prefix: &str) -> RemoteCache<MockKvClient> {
        RemoteCache::new(
            MockKvClient::new(),
            RemoteCacheConfig {
                prefix: prefix.to_string(),
                default_ttl: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn round_trip_uses_prefixed_json() {
        let cache = cache("app");
        let ctx = RequestContext::new();

        cache.set(&ctx, "k", json!({"id": 7}), Duration::ZERO).await.unwrap();
        assert_eq!(cache.client().raw("app:k"), Some(r#"{"id":7}"#.to_string()));
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!({"id": 7}));
        assert!(cache.exists(&ctx, "k").await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_value_is_returned_raw() {
        let cache = cache("app");
        let ctx = RequestContext::new();
        cache.client().insert_raw("app:legacy", "not json");

        assert_eq!(cache.get(&ctx, "legacy").await.unwrap(), json!("not json"));
    }

    #[tokio::test]
    async fn ttl_round_trip() {
        let cache = cache("app");
        let ctx = RequestContext::new();

        cache.set(&ctx, "k", json!(1), Duration::from_millis(30)).await.unwrap();
        assert!(cache.ttl(&ctx, "k").await.unwrap() > Duration::ZERO);
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), json!(1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&ctx, "k").await.unwrap_err().is_miss());
        assert_eq!(cache.ttl(&ctx, "k").await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_ttl_uses_default() {
        let cache = RemoteCache::new(
            MockKvClient::new(),
            RemoteCacheConfig {
                prefix: "app".into(),
                default_ttl: Duration::from_secs(30),
            },
        );
        let ctx = RequestContext::new();
        cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
        assert!(cache.ttl(&ctx, "k").await.unwrap() > Duration::from_secs(29));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = cache("app");
        let ctx = RequestContext::new();

        cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
        cache.delete(&ctx, "k").await.unwrap();
        cache.delete(&ctx, "k").await.unwrap();
        assert!(!cache.exists(&ctx, "k").await.unwrap());
        assert_eq!(cache.stats().deletes, 1);
    }

    #[tokio::test]
    async fn prefixed_clear_only_touches_namespace() {
        let cache = cache("app");
        let ctx = RequestContext::new();
        cache.client().insert_raw("other:k", "\"keep\"");

        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        cache.set(&ctx, "b", json!(2), Duration::ZERO).await.unwrap();
        cache.clear(&ctx).await.unwrap();

        assert!(!cache.exists(&ctx, "a").await.unwrap());
        assert_eq!(cache.client().raw("other:k"), Some("\"keep\"".to_string()));
        assert_eq!(cache.client().flush_count(), 0);
    }

    #[tokio::test]
    async fn wildcard_in_prefix_is_literal() {
        let cache = cache("tenant*");
        let ctx = RequestContext::new();
        cache.client().insert_raw("tenantB:secret", "\"other tenant\"");
        cache.client().insert_raw("tenant:x", "\"shorter prefix\"");

        cache.set(&ctx, "a", json!(1), Duration::ZERO).await.unwrap();
        cache.clear(&ctx).await.unwrap();

        assert!(!cache.exists(&ctx, "a").await.unwrap());
        assert_eq!(
            cache.client().raw("tenantB:secret"),
            Some("\"other tenant\"".to_string())
        );
        assert!(cache.client().raw("tenant:x").is_some());
        assert!(
            cache
                .client()
                .recorded_calls()
                .contains(&"keys tenant\\*:*".to_string())
        );
    }

    #[tokio::test]
    async fn prefixed_clear_without_enumeration_fails_loudly() {
        let cache = RemoteCache::new(
            MockKvClient::new().without_key_listing(),
            RemoteCacheConfig {
                prefix: "app".into(),
                default_ttl: Duration::ZERO,
            },
        );
        let ctx = RequestContext::new();
        cache.client().insert_raw("other:k", "1");

        let err = cache.clear(&ctx).await.unwrap_err();
        assert!(matches!(err, CacheError::Unsupported(_)));
        assert_eq!(cache.client().flush_count(), 0);
        assert!(cache.client().raw("other:k").is_some());
    }

    #[tokio::test]
    async fn unprefixed_clear_flushes_the_whole_store() {
        // Dangerous: every key in the store is gone, not just ours.
        let cache = cache("");
        let ctx = RequestContext::new();
        cache.client().insert_raw("someone-else", "1");

        cache.set(&ctx, "mine", json!(1), Duration::ZERO).await.unwrap();
        cache.clear(&ctx).await.unwrap();

        assert_eq!(cache.client().flush_count(), 1);
        assert!(cache.client().raw("someone-else").is_none());
    }

    #[tokio::test]
    async fn transport_errors_are_not_misses() {
        let cache = cache("app");
        let ctx = RequestContext::new();
        cache
            .client()
            .queue_error(KvError::Connection("connection refused".into()));

        let err = cache.get(&ctx, "k").await.unwrap_err();
        assert!(!err.is_miss());
        assert!(matches!(err, CacheError::Remote(KvError::Connection(_))));
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let cache = cache("app");
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = cache.get(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, CacheError::Cancelled(ContextError::Cancelled)));
        assert!(cache.client().recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn stats_hit_rate() {
        let cache = cache("app");
        let ctx = RequestContext::new();
        cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
        cache.get(&ctx, "k").await.unwrap();
        let _ = cache.get(&ctx, "absent").await;

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
