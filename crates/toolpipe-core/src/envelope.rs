//! Request and response envelopes carried through the pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde_json::Value;

use crate::chain::HandlerResult;
use crate::context::RequestContext;

/// Plain metadata map used on responses.
pub type MetadataMap = HashMap<String, Value>;

/// Request metadata shared by reference.
///
/// Cloning a `Metadata` (or the [`ToolRequest`] that owns it) yields a handle
/// to the same map, so a value written by an inner middleware is visible to
/// the outer ones after `next` returns.
#[derive(Clone, Default)]
pub struct Metadata {
    inner: Arc<Mutex<MetadataMap>>,
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.lock().iter()).finish()
    }
}

impl Metadata {
    /// Creates an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.lock().insert(key.into(), value.into())
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copies the current contents out.
    pub fn snapshot(&self) -> MetadataMap {
        self.inner.lock().clone()
    }
}

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Stable identifier of the operation being invoked.
    pub tool_name: String,

    /// Handler-specific payload. The pipeline never interprets it.
    pub arguments: Value,

    /// Cancellation and request-scoped values.
    pub context: RequestContext,

    /// Shared metadata written by middlewares on the way in.
    pub metadata: Metadata,

    start_time: Instant,
    received_at: SystemTime,
}

impl ToolRequest {
    /// Creates a request with a fresh root context.
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            context: RequestContext::new(),
            metadata: Metadata::new(),
            start_time: Instant::now(),
            received_at: SystemTime::now(),
        }
    }

    /// Replaces the context.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// When the request entered the pipeline (monotonic clock).
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// When the request entered the pipeline (wall clock).
    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Time since the request entered the pipeline.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// The request id from the context, or `""` when none is set.
    pub fn request_id(&self) -> &str {
        self.context.request_id().unwrap_or_default()
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResponse {
    /// The handler's result. `None` for failures that produced no content.
    pub result: Option<Value>,

    /// Whether the invocation failed.
    pub is_error: bool,

    /// Elapsed time, filled in by the timing middleware.
    pub duration: Duration,

    /// Metadata written by middlewares on the way out.
    pub metadata: MetadataMap,
}

impl ToolResponse {
    /// A successful response carrying `result`.
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::default()
        }
    }

    /// An error response whose content is a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: Some(Value::String(message.into())),
            is_error: true,
            ..Self::default()
        }
    }

    /// An error response with no content.
    pub fn failure() -> Self {
        Self {
            is_error: true,
            ..Self::default()
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the response succeeded.
    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// Textual form of the result: strings as-is, other values as JSON.
    pub fn content(&self) -> String {
        match &self.result {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Converts a handler result into the response sent across the pipeline
    /// boundary.
    ///
    /// Errors become `is_error` responses with the error message as content.
    /// Metadata of a response carried by the error is preserved.
    pub fn from_result(result: HandlerResult) -> Self {
        match result {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }
}
