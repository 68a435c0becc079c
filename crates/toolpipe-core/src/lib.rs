//! # toolpipe-core
//!
//! Request envelope, middleware chain and built-in middlewares for tool
//! handlers.
//!
//! A tool handler is an async function from a [`ToolRequest`] to a
//! [`ToolResponse`]. Everything that is not the tool's own job (panic
//! containment, logging, timing, counting) is a [`Middleware`] that wraps the
//! handler. A [`Chain`] composes middlewares in order and binds them to a
//! terminal handler.
//!
//! # Quick start
//!
//! ```rust
//! use serde_json::json;
//! use toolpipe_core::{Chain, Handler, ToolRequest, ToolResponse};
//! use toolpipe_core::middleware::{Logging, Metrics, Recovery, Timing};
//!
//! # async fn example() {
//! let metrics = Metrics::new();
//! let handler = Chain::new()
//!     .with(Recovery::default())
//!     .with(Logging::default())
//!     .with(Timing::default())
//!     .with(metrics.clone())
//!     .then(Handler::new(|req: ToolRequest| async move {
//!         Ok(ToolResponse::success(json!({ "echo": req.arguments })))
//!     }));
//!
//! let response = ToolResponse::from_result(
//!     handler.call(ToolRequest::new("echo", json!({"x": 1}))).await,
//! );
//! assert!(!response.is_error);
//! assert_eq!(metrics.metrics().total_requests, 1);
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chain`] | [`Handler`], the [`Middleware`] trait and [`Chain`] |
//! | [`context`] | [`RequestContext`]: cancellation, deadline, request values |
//! | [`envelope`] | [`ToolRequest`] and [`ToolResponse`] |
//! | [`error`] | [`PipelineError`] and [`ToolError`] |
//! | [`middleware`] | Recovery, safe execution, logging, timing, metrics, request ids |

#![warn(missing_docs)]

pub mod chain;
pub mod context;
pub mod envelope;
pub mod error;
pub mod middleware;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Individual middlewares stay under `toolpipe_core::middleware::*`.

pub use chain::{BoxFuture, Chain, FnMiddleware, Handler, HandlerResult, Middleware};
pub use context::{ContextError, RequestContext};
pub use envelope::{Metadata, MetadataMap, ToolRequest, ToolResponse};
pub use error::{PipelineError, ToolError};
