//! Read-through caching for tool handlers.
//!
//! [`CacheMiddleware`] makes any handler cacheable without touching it.
//! It works in two shapes:
//!
//! - around a plain tool function `(RequestContext, Value) -> Result<Value, ToolError>`
//!   via [`wrap`](CacheMiddleware::wrap) or [`execute`](CacheMiddleware::execute);
//! - inside a [`Chain`](toolpipe_core::Chain), since it also implements
//!   [`Middleware`].
//!
//! Caching is best-effort. A cache that fails or cannot build a key never
//! fails the request; the handler is simply called.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use toolpipe_core::{
    BoxFuture, Handler, Middleware, RequestContext, ToolError, ToolRequest, ToolResponse,
};

use crate::cache::Cache;
use crate::error::CacheError;
use crate::key::KeyBuilder;

/// Predicate deciding which calls bypass the cache, given the tool name and
/// arguments.
pub type SkipFn = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// A tool function, as returned by [`CacheMiddleware::wrap`].
pub type ToolFn =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<Result<Value, ToolError>> + Send + Sync>;

/// Configuration for [`CacheMiddleware`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMiddlewareConfig {
    /// First segment of every key. Empty means none.
    pub key_prefix: String,
    /// TTL passed to [`Cache::set`]. Zero defers to the cache's default.
    pub ttl: Duration,
}

/// Read-through cache in front of a tool handler.
///
/// For each call:
///
/// 1. If the skip predicate matches, call the handler with no cache access.
///    This is how mutating tools are kept out of the cache.
/// 2. Build the key `prefix:tool_name:sha256(arguments)`.
/// 3. On a hit, return the cached value without calling the handler.
/// 4. Otherwise call the handler. Errors propagate and are not cached.
///    Successful values are stored with the configured TTL.
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::{Value, json};
/// use toolpipe_cache::{CacheMiddleware, CacheMiddlewareConfig, MemoryCache};
/// use toolpipe_core::{RequestContext, ToolError};
///
/// # async fn example() -> Result<(), ToolError> {
/// let cache = Arc::new(MemoryCache::default());
/// let middleware = CacheMiddleware::new(cache, CacheMiddlewareConfig {
///     key_prefix: "tools".into(),
///     ttl: Duration::from_secs(60),
/// })
/// .with_skip(|tool, _args| tool.starts_with("store_"));
///
/// let list_accounts = middleware.wrap("list_accounts", |_ctx, args: Value| async move {
///     Ok(json!({ "accounts": [], "page": args["page"] }))
/// });
///
/// let ctx = RequestContext::new();
/// let first = list_accounts(ctx.clone(), json!({"page": 1})).await?;
/// let second = list_accounts(ctx, json!({"page": 1})).await?;
/// assert_eq!(first, second);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheMiddleware {
    cache: Arc<dyn Cache>,
    keys: KeyBuilder,
    ttl: Duration,
    skip: Option<SkipFn>,
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware")
            .field("key_prefix", &self.keys.prefix())
            .field("ttl", &self.ttl)
            .field("skip", &self.skip.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheMiddleware {
    /// Creates a middleware over `cache`.
    pub fn new(cache: Arc<dyn Cache>, config: CacheMiddlewareConfig) -> Self {
        Self {
            cache,
            keys: KeyBuilder::new(config.key_prefix),
            ttl: config.ttl,
            skip: None,
        }
    }

    /// Sets the predicate for calls that must bypass the cache.
    #[must_use]
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// The cache in use.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    fn skips(&self, tool_name: &str, arguments: &Value) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(tool_name, arguments))
    }

    /// Key for a call, or `None` if it should go uncached.
    fn key_for(&self, tool_name: &str, arguments: &Value) -> Option<String> {
        if self.skips(tool_name, arguments) {
            return None;
        }
        match self.keys.tool_key(tool_name, arguments) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::debug!(tool = tool_name, error = %err, "cache key unavailable, calling through");
                None
            }
        }
    }

    /// Looks up `key`, treating any failure as a miss.
    async fn lookup(&self, ctx: &RequestContext, tool_name: &str, key: &str) -> Option<Value> {
        match self.cache.get(ctx, key).await {
            Ok(Value::Null) => None,
            Ok(value) => {
                tracing::debug!(tool = tool_name, key, "cache hit");
                Some(value)
            }
            Err(CacheError::Miss) => None,
            Err(err) => {
                tracing::debug!(tool = tool_name, key, error = %err, "cache lookup failed, calling through");
                None
            }
        }
    }

    async fn store(&self, ctx: &RequestContext, tool_name: &str, key: &str, value: Value) {
        if let Err(err) = self.cache.set(ctx, key, value, self.ttl).await {
            tracing::debug!(tool = tool_name, key, error = %err, "cache store failed, ignoring");
        }
    }

    /// Runs one call through the cache.
    ///
    /// # Errors
    ///
    /// Returns the handler's error unchanged. Cache failures never surface.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        arguments: Value,
        handler: F,
    ) -> Result<Value, ToolError>
    where
        F: FnOnce(RequestContext, Value) -> Fut,
        Fut: Future<Output = Result<Value, ToolError>>,
    {
        let Some(key) = self.key_for(tool_name, &arguments) else {
            return handler(ctx.clone(), arguments).await;
        };

        if let Some(cached) = self.lookup(ctx, tool_name, &key).await {
            return Ok(cached);
        }

        let value = handler(ctx.clone(), arguments).await?;
        self.store(ctx, tool_name, &key, value.clone()).await;
        Ok(value)
    }

    /// Returns a cached version of `handler` for `tool_name`.
    pub fn wrap<F, Fut>(&self, tool_name: impl Into<String>, handler: F) -> ToolFn
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let middleware = self.clone();
        let tool_name: Arc<str> = tool_name.into().into();
        let handler = Arc::new(handler);
        Arc::new(move |ctx: RequestContext, arguments: Value| -> BoxFuture<Result<Value, ToolError>> {
            let middleware = middleware.clone();
            let tool_name = Arc::clone(&tool_name);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                middleware
                    .execute(&ctx, &tool_name, arguments, |ctx, args| handler(ctx, args))
                    .await
            })
        })
    }

    /// Invalidates cached entries after a write.
    ///
    /// The cache has no pattern matching, so this clears **everything** the
    /// cache holds regardless of `pattern`. Expect a burst of misses after
    /// calling it.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Cache::clear`] returns.
    pub async fn invalidate_pattern(
        &self,
        ctx: &RequestContext,
        pattern: &str,
    ) -> Result<(), CacheError> {
        tracing::debug!(pattern, "pattern invalidation clears the whole cache");
        self.cache.clear(ctx).await
    }
}

impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    /// Caches `result` of successful responses. Hits come back as
    /// `ToolResponse::success` with `cache_hit: true` metadata.
    fn process(&self, next: Handler) -> Handler {
        let middleware = self.clone();
        Handler::new(move |request: ToolRequest| {
            let middleware = middleware.clone();
            let next = next.clone();
            async move {
                let Some(key) = middleware.key_for(&request.tool_name, &request.arguments) else {
                    return next.call(request).await;
                };
                let ctx = request.context.clone();
                let tool_name = request.tool_name.clone();

                if let Some(cached) = middleware.lookup(&ctx, &tool_name, &key).await {
                    return Ok(ToolResponse::success(cached).with_metadata("cache_hit", true));
                }

                let result = next.call(request).await;
                if let Ok(ToolResponse {
                    is_error: false,
                    result: Some(value),
                    ..
                }) = &result
                {
                    middleware.store(&ctx, &tool_name, &key, value.clone()).await;
                }
                result
            }
        })
    }
}
