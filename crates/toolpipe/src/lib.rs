//! # toolpipe
//!
//! A request pipeline for tool handlers, with a pluggable result cache.
//!
//! This crate re-exports [`toolpipe_core`] (envelopes, chain, middlewares)
//! and [`toolpipe_cache`] (cache backends and the cache middleware) and adds
//! the pieces an application needs to wire them together: a TOML
//! configuration file, a builder for the standard middleware stack, and
//! tracing setup.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!                     │   toolpipe   │  config, builder, tracing
//!                     └──────┬───────┘
//!                ┌───────────┴───────────┐
//!                ▼                       ▼
//!       ┌────────────────┐      ┌────────────────┐
//!       │ toolpipe-core  │◀─────│ toolpipe-cache │
//!       │ chain, context │      │ memory, remote │
//!       └────────────────┘      └────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use toolpipe::cache::{CacheMiddleware, MemoryCache};
//! use toolpipe::{Handler, PipelineBuilder, PipelineConfig, ToolRequest, ToolResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_file("toolpipe.toml")?;
//! toolpipe::init_tracing(config.logging.level);
//!
//! let cache = Arc::new(MemoryCache::new(config.memory_cache()));
//! let handler = PipelineBuilder::from_config(&config)
//!     .with_middleware(CacheMiddleware::new(cache, config.cache_middleware()))
//!     .build(Handler::new(|req: ToolRequest| async move {
//!         Ok(ToolResponse::success(json!({"echo": req.arguments})))
//!     }));
//!
//! let response = ToolResponse::from_result(
//!     handler.call(ToolRequest::new("echo", json!({"x": 1}))).await,
//! );
//! println!("{}", response.content());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | [`PipelineConfig`] loaded from TOML |
//! | [`builder`] | [`PipelineBuilder`] for the standard stack |
//! | [`middleware`] | Recovery, safe execution, logging, timing, metrics |
//! | [`cache`] | Cache trait, backends, and [`cache::CacheMiddleware`] |

#![warn(missing_docs)]

pub mod builder;
pub mod config;

pub use toolpipe_cache as cache;
pub use toolpipe_core::middleware;

// ── Core re-exports ─────────────────────────────────────────────────

pub use builder::PipelineBuilder;
pub use config::{ConfigError, PipelineConfig};
pub use toolpipe_core::{
    BoxFuture, Chain, ContextError, FnMiddleware, Handler, HandlerResult, Metadata, MetadataMap,
    Middleware, PipelineError, RequestContext, ToolError, ToolRequest, ToolResponse,
};

use toolpipe_core::middleware::LogLevel;
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise events at `level` and above are
/// shown. Returns `false` if a global subscriber was already installed, in
/// which case nothing changes.
pub fn init_tracing(level: LogLevel) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing(LogLevel::Warn);
        assert!(!init_tracing(LogLevel::Debug));
    }
}
