//! Pre-built helpers for testing code built on `toolpipe-core`.
//!
//! Available when the `test-utils` feature is enabled, allowing
//! downstream crates to reuse these utilities in their own test
//! suites. Also compiled during `#[cfg(test)]` for this crate's
//! own tests. Provides request shorthands, canned terminal handlers,
//! and a middleware that records the order it was entered and left.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::chain::{Handler, Middleware};
use crate::envelope::{ToolRequest, ToolResponse};
use crate::error::{PipelineError, ToolError};

/// Shorthand for [`ToolRequest::new`].
pub fn request(tool_name: impl Into<String>, arguments: Value) -> ToolRequest {
    ToolRequest::new(tool_name, arguments)
}

/// Terminal handler that succeeds with `{"tool": <name>, "arguments": <args>}`.
pub fn echo_handler() -> Handler {
    Handler::new(|req: ToolRequest| async move {
        Ok(ToolResponse::success(json!({
            "tool": req.tool_name,
            "arguments": req.arguments,
        })))
    })
}

/// Terminal handler that fails with a [`ToolError`] carrying `message`.
pub fn failing_handler(message: &str) -> Handler {
    let message = message.to_string();
    Handler::new(move |req: ToolRequest| {
        let message = message.clone();
        async move { Err(PipelineError::handler(req.tool_name, ToolError::new(message))) }
    })
}

/// Terminal handler that returns `Ok` with an `is_error` response.
pub fn error_response_handler(message: &str) -> Handler {
    let message = message.to_string();
    Handler::new(move |_req: ToolRequest| {
        let message = message.clone();
        async move { Ok(ToolResponse::error(message)) }
    })
}

/// Terminal handler that panics with `message` when polled.
pub fn panicking_handler(message: &str) -> Handler {
    let message = message.to_string();
    Handler::new(move |_req: ToolRequest| {
        let message = message.clone();
        async move {
            if !message.is_empty() {
                panic!("{message}");
            }
            Ok(ToolResponse::success(Value::Null))
        }
    })
}

/// Terminal handler that sleeps for `delay`, then echoes the tool name.
pub fn sleeping_handler(delay: Duration) -> Handler {
    Handler::new(move |req: ToolRequest| async move {
        tokio::time::sleep(delay).await;
        Ok(ToolResponse::success(json!({ "tool": req.tool_name })))
    })
}

/// Records `<name>-before` and `<name>-after` into a shared log.
#[derive(Debug, Clone)]
pub struct RecordingMiddleware {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingMiddleware {
    /// Creates a recorder that appends to `log`.
    pub fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { name, log }
    }
}

impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        self.name
    }

    fn process(&self, next: Handler) -> Handler {
        let name = self.name;
        let log = Arc::clone(&self.log);
        Handler::new(move |req: ToolRequest| {
            let next = next.clone();
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}-before"));
                let result = next.call(req).await;
                log.lock().push(format!("{name}-after"));
                result
            }
        })
    }
}

// ── Log capture ─────────────────────────────────────────────────────

/// Buffers formatted tracing output so tests can assert on emitted lines.
///
/// Install with `tracing::subscriber::set_default(logs.subscriber())` on a
/// current-thread runtime; the guard scopes capture to the test thread.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CapturedLogs {
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[cfg(test)]
impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
