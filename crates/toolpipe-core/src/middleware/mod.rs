//! Built-in middlewares for common cross-cutting concerns.
//!
//! | Middleware | Concern |
//! |------------|---------|
//! | [`Recovery`] | Converts handler panics into error responses |
//! | [`SafeExecution`] | Panic isolation plus a race against context cancellation |
//! | [`Logging`] | Leveled request/response logging through `tracing` |
//! | [`Timing`] | Wall-clock duration on the response, slow-request warnings |
//! | [`Metrics`] | Global and per-tool request counters |
//! | [`RequestId`] | Assigns a request id to requests that lack one |
//! | [`NoOp`] | Passes through unchanged |
//!
//! Every middleware is independent and obeys the same
//! [`Middleware`](crate::Middleware) contract, so they can be combined in any
//! order. A typical production chain is:
//!
//! ```text
//! RequestId -> Recovery -> Logging -> Timing -> Metrics -> handler
//! ```
//!
//! Only [`SafeExecution`] observes cancellation mid-flight. The others run
//! until `next` completes regardless of the context state.

use std::any::Any;

use crate::chain::{Handler, Middleware};

mod logging;
mod metrics;
mod recovery;
mod request_id;
mod safe;
mod timing;

pub use logging::{LogLevel, Logging, LoggingConfig, ParseLogLevelError};
pub use metrics::{Metrics, RequestMetrics, ToolMetrics};
pub use recovery::{Recovery, RecoveryConfig};
pub use request_id::RequestId;
pub use safe::{PanicHandlerFn, SafeExecution};
pub use timing::{DEFAULT_SLOW_REQUEST_THRESHOLD, Timing, TimingConfig};

/// Pass-through middleware that does nothing.
///
/// Useful for testing and as a placeholder.
#[derive(Debug, Clone, Default)]
pub struct NoOp;

impl Middleware for NoOp {
    fn name(&self) -> &str {
        "noop"
    }

    fn process(&self, next: Handler) -> Handler {
        next
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
