//! Panic recovery.

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use super::panic_message;
use crate::chain::{Handler, Middleware};
use crate::envelope::{ToolRequest, ToolResponse};
use crate::error::PipelineError;

/// Configuration for [`Recovery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Log a backtrace captured at the recovery point alongside the panic.
    pub panic_stack_trace: bool,
}

/// Converts panics inside the wrapped handler into error results.
///
/// A caught panic becomes [`PipelineError::Panic`] carrying a response with
/// `is_error = true` and metadata `{panic: true, panic_value: "<message>"}`.
/// Without a panic the middleware is transparent.
///
/// ```rust
/// use serde_json::json;
/// use toolpipe_core::{Chain, Handler, ToolRequest, ToolResponse};
/// use toolpipe_core::middleware::Recovery;
///
/// # async fn example() {
/// let handler = Chain::new()
///     .with(Recovery::default())
///     .then(Handler::new(|_req: ToolRequest| async {
///         if true {
///             panic!("boom");
///         }
///         Ok(ToolResponse::success("never"))
///     }));
///
/// let err = handler.call(ToolRequest::new("t", json!({}))).await.unwrap_err();
/// assert!(err.is_panic());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    config: RecoveryConfig,
}

impl Recovery {
    /// Creates a recovery middleware with the given configuration.
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Enables or disables backtrace logging.
    #[must_use]
    pub fn with_stack_trace(mut self, enabled: bool) -> Self {
        self.config.panic_stack_trace = enabled;
        self
    }
}

impl Middleware for Recovery {
    fn name(&self) -> &str {
        "recovery"
    }

    fn process(&self, next: Handler) -> Handler {
        let stack_trace = self.config.panic_stack_trace;
        Handler::new(move |request: ToolRequest| {
            let next = next.clone();
            async move {
                let tool_name = request.tool_name.clone();
                let request_id = request.request_id().to_string();

                // Building the inner future happens inside the barrier too.
                let guarded = AssertUnwindSafe(async move { next.call(request).await });
                match guarded.catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        log_panic(&tool_name, &request_id, &message, stack_trace);
                        Err(panic_error(tool_name, message))
                    }
                }
            }
        })
    }
}

/// Logs a caught panic, optionally with a backtrace.
pub(crate) fn log_panic(tool_name: &str, request_id: &str, message: &str, stack_trace: bool) {
    if stack_trace {
        let backtrace = Backtrace::force_capture();
        tracing::error!(
            tool = tool_name,
            request_id,
            panic = message,
            backtrace = %backtrace,
            "recovered from panic in tool handler"
        );
    } else {
        tracing::error!(
            tool = tool_name,
            request_id,
            panic = message,
            "recovered from panic in tool handler"
        );
    }
}

/// Builds the error returned for a caught panic.
pub(crate) fn panic_error(tool_name: String, message: String) -> PipelineError {
    let response = ToolResponse::failure()
        .with_metadata("panic", true)
        .with_metadata("panic_value", message.clone());
    PipelineError::Panic {
        tool_name,
        message,
        response: Box::new(response),
    }
}
