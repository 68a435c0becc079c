//! Composable middleware chain for tool handlers.
//!
//! The core abstraction is the [`Middleware`] trait: it turns one [`Handler`]
//! into another, adding a cross-cutting behavior around the call. A [`Chain`]
//! is an ordered list of middlewares that can be bound to a terminal handler.
//!
//! # Architecture
//!
//! ```text
//! Chain::new()
//!     .with(Recovery::default())     // outermost: sees request first
//!     .with(Logging::default())
//!     .with(Timing::default())       // innermost: sees request last
//!     .then(terminal)                // -> Handler
//! ```
//!
//! Middlewares run in the order they were supplied on the way in, and in
//! reverse order on the way out.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use toolpipe_core::{Chain, Handler, ToolRequest, ToolResponse};
//! use toolpipe_core::middleware::{Recovery, Timing};
//!
//! # async fn example() {
//! let terminal = Handler::new(|req: ToolRequest| async move {
//!     Ok(ToolResponse::success(json!({ "tool": req.tool_name })))
//! });
//!
//! let handler = Chain::new()
//!     .with(Recovery::default())
//!     .with(Timing::default())
//!     .then(terminal);
//!
//! let response = handler.call(ToolRequest::new("list_accounts", json!({}))).await;
//! assert!(response.is_ok());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::envelope::{ToolRequest, ToolResponse};
use crate::error::PipelineError;

/// A pinned, boxed, `Send` future that owns everything it borrows.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What every handler returns.
pub type HandlerResult = Result<ToolResponse, PipelineError>;

type HandlerFn = dyn Fn(ToolRequest) -> BoxFuture<HandlerResult> + Send + Sync;

/// A function from a request envelope to a response envelope or an error.
///
/// `Handler` is cheap to clone: clones share the same underlying function.
/// It owns its request so a middleware can move the call onto another task.
#[derive(Clone)]
pub struct Handler {
    f: Arc<HandlerFn>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

impl Handler {
    /// Wraps an async closure as a handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            f: Arc::new(move |request| -> BoxFuture<HandlerResult> { Box::pin(f(request)) }),
        }
    }

    /// Invokes the handler.
    pub fn call(&self, request: ToolRequest) -> BoxFuture<HandlerResult> {
        (self.f)(request)
    }

    /// Whether two handles point at the same underlying function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

/// Wraps a handler with a cross-cutting behavior.
///
/// A middleware can:
/// - Pass through: return a handler that calls `next` unchanged
/// - Modify the request: adjust context or metadata, then call `next`
/// - Short-circuit: return a response without calling `next`
/// - Wrap output: call `next`, then annotate or convert the result
///
/// # Implementing
///
/// ```rust
/// use toolpipe_core::{Handler, Middleware, ToolRequest};
///
/// struct Tag;
///
/// impl Middleware for Tag {
///     fn name(&self) -> &str {
///         "tag"
///     }
///
///     fn process(&self, next: Handler) -> Handler {
///         Handler::new(move |req: ToolRequest| {
///             let next = next.clone();
///             async move {
///                 req.metadata.insert("tagged", true);
///                 next.call(req).await
///             }
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Human-readable name, used in diagnostics.
    fn name(&self) -> &str;

    /// Returns a handler that wraps `next`.
    fn process(&self, next: Handler) -> Handler;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process(&self, next: Handler) -> Handler {
        (**self).process(next)
    }
}

/// A middleware defined by a closure.
///
/// Handy for one-off custom behavior that does not deserve its own type.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    /// Creates a named middleware from a `Handler -> Handler` closure.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, next: Handler) -> Handler {
        (self.f)(next)
    }
}

/// An ordered, immutable-after-construction list of middlewares.
///
/// - First added = outermost = sees request first, sees response last
/// - Last added = innermost = sees request last, sees response first
///
/// [`append`](Self::append) and [`prepend`](Self::prepend) return new chains,
/// so handlers composed from the original chain keep their behavior.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("middlewares", &self.names())
            .finish()
    }
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Creates a chain from middlewares in execution order.
    pub fn from_middlewares(middlewares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        Self {
            layers: middlewares.into_iter().collect(),
        }
    }

    /// Adds a middleware at the inner end of the chain.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Adds a shared middleware instance.
    ///
    /// Useful when the same instance must be observed from outside, e.g. a
    /// metrics collector whose counters are read by a dashboard.
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Returns a new chain with `more` added after the existing middlewares.
    #[must_use]
    pub fn append(&self, more: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        let mut layers = self.layers.clone();
        layers.extend(more);
        Self { layers }
    }

    /// Returns a new chain with `more` added before the existing middlewares.
    #[must_use]
    pub fn prepend(&self, more: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        let mut layers: Vec<_> = more.into_iter().collect();
        layers.extend(self.layers.iter().cloned());
        Self { layers }
    }

    /// Composes the chain around `terminal`.
    ///
    /// Folds from the last middleware inward so the first one ends up
    /// outermost. An empty chain returns `terminal` itself.
    pub fn then(&self, terminal: Handler) -> Handler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.process(next))
    }

    /// Names of the middlewares, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Check if the chain has any middlewares.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Get the number of middlewares in the chain.
    pub fn len(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::middleware::NoOp;
    use crate::test_helpers::{RecordingMiddleware, echo_handler, failing_handler, request};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
        Arc::new(RecordingMiddleware::new(name, Arc::clone(log)))
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let terminal = echo_handler();
        let composed = Chain::new().then(terminal.clone());
        assert!(composed.ptr_eq(&terminal));

        let direct = terminal.call(request("echo", json!({"a": 1}))).await.unwrap();
        let chained = composed.call(request("echo", json!({"a": 1}))).await.unwrap();
        assert_eq!(direct.result, chained.result);
    }

    #[tokio::test]
    async fn noop_middleware_passthrough() {
        let handler = Chain::new().with(NoOp).with(NoOp).then(echo_handler());
        let response = handler.call(request("multi", json!("x"))).await.unwrap();
        assert_eq!(response.result.unwrap()["arguments"], json!("x"));
    }

    #[tokio::test]
    async fn middleware_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal_log = Arc::clone(&log);
        let terminal = Handler::new(move |_req: ToolRequest| {
            let log = Arc::clone(&terminal_log);
            async move {
                log.lock().push("terminal".to_string());
                Ok(ToolResponse::success("done"))
            }
        });

        let chain = Chain::from_middlewares([
            recorder("m1", &log),
            recorder("m2", &log),
            recorder("m3", &log),
        ]);
        let _ = chain.then(terminal).call(request("order", json!({}))).await;

        let recorded = log.lock().clone();
        assert_eq!(
            recorded,
            vec![
                "m1-before",
                "m2-before",
                "m3-before",
                "terminal",
                "m3-after",
                "m2-after",
                "m1-after"
            ]
        );
    }

    #[tokio::test]
    async fn append_and_prepend_do_not_mutate_original() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new().with_shared(recorder("base", &log));

        let appended = chain.append([recorder("tail", &log)]);
        let prepended = chain.prepend([recorder("head", &log)]);

        assert_eq!(chain.names(), vec!["base"]);
        assert_eq!(appended.names(), vec!["base", "tail"]);
        assert_eq!(prepended.names(), vec!["head", "base"]);

        let _ = chain.then(echo_handler()).call(request("t", json!({}))).await;
        assert_eq!(log.lock().clone(), vec!["base-before", "base-after"]);

        log.lock().clear();
        let _ = prepended
            .then(echo_handler())
            .call(request("t", json!({})))
            .await;
        assert_eq!(
            log.lock().clone(),
            vec!["head-before", "base-before", "base-after", "head-after"]
        );
    }

    #[tokio::test]
    async fn composed_handler_survives_derivation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new().with_shared(recorder("only", &log));
        let handler = chain.then(echo_handler());

        let _derived = chain.append([recorder("extra", &log)]);
        let _ = handler.call(request("t", json!({}))).await;

        assert_eq!(log.lock().clone(), vec!["only-before", "only-after"]);
    }

    #[tokio::test]
    async fn short_circuit_middleware() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let terminal = Handler::new(move |_req: ToolRequest| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(ToolResponse::success("unreachable")) }
        });

        let deny = FnMiddleware::new("deny", |_next: Handler| {
            Handler::new(|_req: ToolRequest| async { Ok(ToolResponse::error("denied")) })
        });

        let response = Chain::new()
            .with(deny)
            .with(NoOp)
            .then(terminal)
            .call(request("blocked", json!({})))
            .await
            .unwrap();

        assert!(response.is_error);
        assert_eq!(response.content(), "denied");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn errors_propagate_unchanged() {
        let handler = Chain::new()
            .with(NoOp)
            .with(NoOp)
            .then(failing_handler("upstream down"));

        let err = handler
            .call(request("list_accounts", json!({})))
            .await
            .unwrap_err();
        match err {
            PipelineError::Handler { tool_name, source } => {
                assert_eq!(tool_name, "list_accounts");
                assert_eq!(source.message, "upstream down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn middleware_can_modify_request() {
        let stamp = FnMiddleware::new("stamp", |next: Handler| {
            Handler::new(move |mut req: ToolRequest| {
                let next = next.clone();
                async move {
                    req.arguments["stamped"] = json!(true);
                    next.call(req).await
                }
            })
        });

        let response = Chain::new()
            .with(stamp)
            .then(echo_handler())
            .call(request("t", json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["arguments"]["stamped"], json!(true));
    }

    #[tokio::test]
    async fn shared_middleware_in_two_chains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = recorder("shared", &log);

        let first = Chain::new().with_shared(Arc::clone(&shared));
        let second = Chain::new().with_shared(Arc::clone(&shared));

        let _ = first.then(echo_handler()).call(request("a", json!({}))).await;
        let _ = second.then(echo_handler()).call(request("b", json!({}))).await;

        assert_eq!(log.lock().len(), 4);
    }

    #[test]
    fn chain_len_and_is_empty() {
        let empty = Chain::new();
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);

        let two = Chain::new().with(NoOp).with(NoOp);
        assert!(!two.is_empty());
        assert_eq!(two.len(), 2);
        assert_eq!(two.names(), vec!["noop", "noop"]);
    }

    #[test]
    fn fn_middleware_debug() {
        let m = FnMiddleware::new("custom", |next: Handler| next);
        assert!(format!("{m:?}").contains("custom"));
        assert_eq!(m.name(), "custom");
    }

    #[test]
    fn tool_error_is_displayed_in_pipeline_error() {
        let err = PipelineError::handler("t", ToolError::new("nope"));
        assert!(err.to_string().contains("nope"));
    }
}
