//! Request-scoped context: cancellation, deadline, and request values.
//!
//! A [`RequestContext`] travels with every [`ToolRequest`](crate::ToolRequest).
//! It carries a [`CancellationToken`], an optional deadline, and a small set of
//! string values (request id, user id, trace id, span id, or anything else a
//! middleware wants to attach).
//!
//! Contexts are cheap to clone. Deriving a context with
//! [`with_value`](RequestContext::with_value) copies the value map on write, so
//! the parent context never observes values set on a derived one.
//!
//! ```rust
//! use std::time::Duration;
//! use toolpipe_core::RequestContext;
//!
//! let ctx = RequestContext::new()
//!     .with_request_id("req-42")
//!     .with_user_id("alice")
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ctx.request_id(), Some("req-42"));
//! assert!(ctx.err().is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Context key for the request id.
pub const REQUEST_ID_KEY: &str = "request_id";
/// Context key for the authenticated user id.
pub const USER_ID_KEY: &str = "user_id";
/// Context key for the distributed trace id.
pub const TRACE_ID_KEY: &str = "trace_id";
/// Context key for the span id within a trace.
pub const SPAN_ID_KEY: &str = "span_id";

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context's cancellation token was cancelled.
    #[error("context cancelled")]
    Cancelled,
    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellable, request-scoped context.
#[derive(Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<HashMap<String, String>>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("values", &self.values)
            .finish()
    }
}

impl RequestContext {
    /// Creates a root context with no deadline and no values.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            values: Arc::new(HashMap::new()),
        }
    }

    /// Creates a context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::new()
        }
    }

    /// Derives a child context.
    ///
    /// Cancelling the child does not cancel the parent, but cancelling the
    /// parent cancels the child. Values and deadline are inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            values: Arc::clone(&self.values),
        }
    }

    /// Returns a context whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept. A timeout too large to
    /// represent leaves the deadline unchanged.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(candidate) => self.with_deadline(candidate),
            None => self,
        }
    }

    /// Returns a context whose deadline is at most `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Returns a context with `key` set to `value`.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value.into());
        self
    }

    /// Looks up a value by key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        self.with_value(REQUEST_ID_KEY, id)
    }

    /// The request id, if one was set.
    pub fn request_id(&self) -> Option<&str> {
        self.value(REQUEST_ID_KEY)
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(self, id: impl Into<String>) -> Self {
        self.with_value(USER_ID_KEY, id)
    }

    /// The user id, if one was set.
    pub fn user_id(&self) -> Option<&str> {
        self.value(USER_ID_KEY)
    }

    /// Sets the trace id.
    #[must_use]
    pub fn with_trace_id(self, id: impl Into<String>) -> Self {
        self.with_value(TRACE_ID_KEY, id)
    }

    /// The trace id, if one was set.
    pub fn trace_id(&self) -> Option<&str> {
        self.value(TRACE_ID_KEY)
    }

    /// Sets the span id.
    #[must_use]
    pub fn with_span_id(self, id: impl Into<String>) -> Self {
        self.with_value(SPAN_ID_KEY, id)
    }

    /// The span id, if one was set.
    pub fn span_id(&self) -> Option<&str> {
        self.value(SPAN_ID_KEY)
    }

    /// The cancellation token backing this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Whether the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                tokio::select! {
                    () = self.token.cancelled() => ContextError::Cancelled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}
