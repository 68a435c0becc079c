//! The minimal key-value client a [`RemoteCache`](crate::RemoteCache) needs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::KvError;

/// Boxed future returned by [`KvClient`] operations.
pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

/// A remote string store with per-key expiry.
///
/// The shape follows Redis: values are strings, `del` and `exists` take many
/// keys and return a count, and `ttl` reports nothing for keys that are
/// absent or have no expiry.
pub trait KvClient: Send + Sync {
    /// Reads `key`.
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>>;

    /// Writes `key`, expiring after `ttl` when given.
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Option<Duration>) -> KvFuture<'a, ()>;

    /// Deletes `keys`, returning how many existed.
    fn del<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64>;

    /// Counts how many of `keys` exist.
    fn exists<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64>;

    /// Remaining lifetime of `key`. `None` if absent or non-expiring.
    fn ttl<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<Duration>>;

    /// Deletes every key in the store, not only this application's.
    fn flush_all(&self) -> KvFuture<'_, ()>;

    /// Lists keys matching a glob `pattern` such as `prefix:*`.
    ///
    /// Patterns use Redis `MATCH` syntax: `*` and `?` are wildcards and a
    /// backslash makes the next character literal. Build literal parts with
    /// [`escape_glob`].
    ///
    /// Clients that cannot enumerate keys keep the default, which fails with
    /// [`KvError::Unsupported`].
    fn keys<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>> {
        let _ = pattern;
        Box::pin(async { Err(KvError::Unsupported("keys")) })
    }

    /// Releases the client's connections.
    fn close(&self) -> KvFuture<'_, ()>;
}

/// Escapes glob metacharacters so `literal` matches only itself inside a
/// [`KvClient::keys`] pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
