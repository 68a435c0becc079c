//! # toolpipe-cache
//!
//! A swappable cache for tool results and the middleware that puts it in
//! front of a handler.
//!
//! # Architecture
//!
//! ```text
//!   CacheMiddleware ──▶ Arc<dyn Cache>
//!                           │
//!              ┌────────────┴────────────┐
//!              ▼                         ▼
//!         MemoryCache             RemoteCache<C: KvClient>
//!   (RwLock<HashMap> + sweeper)          │
//!                              ┌─────────┴─────────┐
//!                              ▼                   ▼
//!                        RedisKvClient        MockKvClient
//!                      (feature "redis")   (feature "test-utils")
//! ```
//!
//! Both backends share [`CacheStats`] accounting and the [`KeyBuilder`]
//! key scheme.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cache`] | The [`Cache`] trait |
//! | [`memory`] | [`MemoryCache`]: in-process, TTL plus capacity bound |
//! | [`remote`] | [`RemoteCache`]: any [`KvClient`] as a cache |
//! | [`kv`] | The [`KvClient`] contract |
//! | [`key`] | [`KeyBuilder`] and argument hashing |
//! | [`middleware`] | [`CacheMiddleware`] |
//! | [`stats`] | [`CacheStats`] |
//! | [`error`] | [`CacheError`] and [`KvError`] |

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod key;
pub mod kv;
pub mod memory;
pub mod middleware;
pub mod remote;
pub mod stats;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use cache::{Cache, CacheFuture};
pub use error::{CacheError, KvError};
pub use key::{KeyBuilder, hash_arguments};
pub use kv::{KvClient, KvFuture, escape_glob};
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use middleware::{CacheMiddleware, CacheMiddlewareConfig, SkipFn, ToolFn};
pub use remote::{RemoteCache, RemoteCacheConfig};
pub use stats::CacheStats;

#[cfg(feature = "redis")]
pub use crate::redis::{RedisConfig, RedisKvClient};
