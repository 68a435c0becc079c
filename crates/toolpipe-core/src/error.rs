//! Error types for pipeline execution.
//!
//! Handlers report their own failures as [`ToolError`]. Everything that
//! crosses a middleware boundary is a [`PipelineError`].
//!
//! # Carried responses
//!
//! Some failures still produce a response: a recovered panic yields a
//! response flagged with `panic: true`, and a cancelled call yields one
//! flagged with `error_type: "timeout"`. Those variants carry the response
//! so outer middlewares (timing, metrics) can annotate it, and so the
//! boundary can return it via [`PipelineError::into_response`]:
//!
//! ```rust
//! use toolpipe_core::{PipelineError, ToolError, ToolResponse};
//!
//! let err = PipelineError::handler("list_accounts", ToolError::new("upstream 502"));
//! assert!(err.response().is_none());
//!
//! let response = ToolResponse::from_result(Err(err));
//! assert!(response.is_error);
//! ```

use serde_json::Value;

use crate::context::ContextError;
use crate::envelope::ToolResponse;

/// Error returned by a tool handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable error description.
    pub message: String,
}

impl ToolError {
    /// Creates a new tool error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error surfaced by a composed [`Handler`](crate::Handler).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The handler panicked and the panic was caught.
    #[error("panic in tool '{tool_name}': {message}")]
    Panic {
        /// Tool that panicked.
        tool_name: String,
        /// Stringified panic payload.
        message: String,
        /// Error response flagged with `panic` and `panic_value`.
        response: Box<ToolResponse>,
    },

    /// The request context was cancelled or its deadline passed before the
    /// handler finished.
    #[error("tool '{tool_name}' timed out: {cause}")]
    Timeout {
        /// Tool that was abandoned.
        tool_name: String,
        /// Why the context finished.
        cause: ContextError,
        /// Error response flagged with `error_type: "timeout"`.
        response: Box<ToolResponse>,
    },

    /// The handler returned its own error.
    #[error("tool '{tool_name}' failed: {source}")]
    Handler {
        /// Tool that failed.
        tool_name: String,
        /// The handler's error.
        #[source]
        source: ToolError,
    },

    /// Any other failure, such as a handler task that could not be joined.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Wraps a handler error.
    pub fn handler(tool_name: impl Into<String>, source: ToolError) -> Self {
        Self::Handler {
            tool_name: tool_name.into(),
            source,
        }
    }

    /// Short machine-readable kind, used as `error_type` metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Panic { .. } => "panic",
            Self::Timeout { .. } => "timeout",
            Self::Handler { .. } => "handler",
            Self::Other(_) => "other",
        }
    }

    /// Returns `true` for a recovered panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic { .. })
    }

    /// Returns `true` for a cancellation or deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The response carried alongside the error, if any.
    pub fn response(&self) -> Option<&ToolResponse> {
        match self {
            Self::Panic { response, .. } | Self::Timeout { response, .. } => Some(&**response),
            _ => None,
        }
    }

    /// Mutable access to the carried response.
    pub fn response_mut(&mut self) -> Option<&mut ToolResponse> {
        match self {
            Self::Panic { response, .. } | Self::Timeout { response, .. } => Some(&mut **response),
            _ => None,
        }
    }

    /// Converts the error into the `is_error` response returned at the
    /// pipeline boundary.
    pub fn into_response(self) -> ToolResponse {
        let message = self.to_string();
        let kind = self.kind();
        match self {
            Self::Panic { response, .. } | Self::Timeout { response, .. } => {
                let mut response = *response;
                response.is_error = true;
                response.result = Some(Value::String(message));
                response
            }
            _ => ToolResponse::error(message).with_metadata("error_type", kind),
        }
    }
}
