//! Panic isolation with cancellation.

use std::fmt;
use std::sync::Arc;

use super::panic_message;
use super::recovery::{log_panic, panic_error};
use crate::chain::{Handler, Middleware};
use crate::envelope::{ToolRequest, ToolResponse};
use crate::error::PipelineError;

/// Callback invoked with the request and the panic message for every caught
/// panic.
pub type PanicHandlerFn = Arc<dyn Fn(&ToolRequest, &str) + Send + Sync>;

/// Runs the wrapped handler on its own task and races it against the
/// request context.
///
/// - The task finishes first: its result is returned. A panic on the task is
///   converted exactly as [`Recovery`](super::Recovery) does.
/// - The context is cancelled or its deadline passes first: the call returns
///   [`PipelineError::Timeout`] carrying a response with
///   `error_type: "timeout"`.
///
/// # Leaked tasks
///
/// On timeout the spawned task is detached, not aborted. A handler that never
/// returns keeps running (and holding whatever it holds) until the runtime
/// shuts down. Handlers that can run long should watch
/// [`RequestContext::token`](crate::RequestContext::token) themselves.
#[derive(Clone, Default)]
pub struct SafeExecution {
    panic_handler: Option<PanicHandlerFn>,
    stack_trace: bool,
}

impl fmt::Debug for SafeExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeExecution")
            .field("panic_handler", &self.panic_handler.is_some())
            .field("stack_trace", &self.stack_trace)
            .finish()
    }
}

impl SafeExecution {
    /// Creates the middleware without a panic callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a callback that is told about every caught panic.
    #[must_use]
    pub fn with_panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ToolRequest, &str) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    /// Enables or disables backtrace logging for caught panics.
    #[must_use]
    pub fn with_stack_trace(mut self, enabled: bool) -> Self {
        self.stack_trace = enabled;
        self
    }
}

impl Middleware for SafeExecution {
    fn name(&self) -> &str {
        "safe_execution"
    }

    fn process(&self, next: Handler) -> Handler {
        let panic_handler = self.panic_handler.clone();
        let stack_trace = self.stack_trace;
        Handler::new(move |request: ToolRequest| {
            let next = next.clone();
            let panic_handler = panic_handler.clone();
            async move {
                let context = request.context.clone();
                let observed = request.clone();
                let tool_name = request.tool_name.clone();

                let mut task = tokio::spawn(async move { next.call(request).await });

                tokio::select! {
                    biased;

                    joined = &mut task => match joined {
                        Ok(result) => result,
                        Err(err) if err.is_panic() => {
                            let message = panic_message(err.into_panic().as_ref());
                            log_panic(&tool_name, observed.request_id(), &message, stack_trace);
                            if let Some(callback) = &panic_handler {
                                callback(&observed, &message);
                            }
                            Err(panic_error(tool_name, message))
                        }
                        Err(err) => Err(PipelineError::Other(format!(
                            "tool '{tool_name}' task failed: {err}"
                        ))),
                    },

                    cause = context.done() => {
                        tracing::warn!(
                            tool = %tool_name,
                            request_id = observed.request_id(),
                            %cause,
                            "abandoning tool handler"
                        );
                        Err(PipelineError::Timeout {
                            tool_name,
                            cause,
                            response: Box::new(
                                ToolResponse::failure().with_metadata("error_type", "timeout"),
                            ),
                        })
                    }
                }
            }
        })
    }
}
