//! The cache capability.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use toolpipe_core::RequestContext;

use crate::error::CacheError;
use crate::stats::CacheStats;

/// Boxed future returned by [`Cache`] operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// A key/value cache with per-entry expiration.
///
/// Object-safe so backends can be swapped behind `Arc<dyn Cache>`.
///
/// # TTL rules
///
/// - `set` with `ttl == Duration::ZERO` uses the backend's default TTL.
/// - A default TTL of zero means entries never expire.
/// - Overwriting a key replaces both its value and its expiration.
/// - An expired entry is never returned.
pub trait Cache: Send + Sync {
    /// Returns the value for `key`, or [`CacheError::Miss`] if it is absent
    /// or expired.
    fn get<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Value>;

    /// Stores `value` under `key`.
    fn set<'a>(
        &'a self,
        ctx: &'a RequestContext,
        key: &'a str,
        value: Value,
        ttl: Duration,
    ) -> CacheFuture<'a, ()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, ()>;

    /// Removes every entry this cache owns.
    fn clear<'a>(&'a self, ctx: &'a RequestContext) -> CacheFuture<'a, ()>;

    /// Whether a live entry exists for `key`.
    fn exists<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, bool>;

    /// Remaining lifetime of `key`. Zero if absent or non-expiring.
    fn ttl<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Duration>;

    /// Snapshot of the counters.
    fn stats(&self) -> CacheStats;

    /// Zeroes the hit, miss, set, delete and eviction counters.
    fn reset_stats(&self);
}

impl<T: Cache + ?Sized> Cache for Arc<T> {
    fn get<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Value> {
        (**self).get(ctx, key)
    }

    fn set<'a>(
        &'a self,
        ctx: &'a RequestContext,
        key: &'a str,
        value: Value,
        ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        (**self).set(ctx, key, value, ttl)
    }

    fn delete<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, ()> {
        (**self).delete(ctx, key)
    }

    fn clear<'a>(&'a self, ctx: &'a RequestContext) -> CacheFuture<'a, ()> {
        (**self).clear(ctx)
    }

    fn exists<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, bool> {
        (**self).exists(ctx, key)
    }

    fn ttl<'a>(&'a self, ctx: &'a RequestContext, key: &'a str) -> CacheFuture<'a, Duration> {
        (**self).ttl(ctx, key)
    }

    fn stats(&self) -> CacheStats {
        (**self).stats()
    }

    fn reset_stats(&self) {
        (**self).reset_stats();
    }
}
