//! Assembles the standard middleware stack from a [`PipelineConfig`].

use std::fmt;
use std::sync::Arc;

use toolpipe_core::middleware::{Logging, Metrics, Recovery, RequestId, Timing};
use toolpipe_core::{Chain, Handler, Middleware};

use crate::config::PipelineConfig;

/// Builds the default chain, outermost first:
///
/// ```text
/// RequestId ─▶ Recovery ─▶ Logging ─▶ Timing ─▶ Metrics ─▶ [extras] ─▶ terminal
/// ```
///
/// Recovery sits outside everything that observes the request so that a
/// panic in a later layer is still contained. Extra middlewares added with
/// [`with_middleware`](Self::with_middleware) run innermost, in the order
/// they were added.
///
/// ```rust
/// use serde_json::json;
/// use toolpipe::{Handler, PipelineBuilder, PipelineConfig, ToolRequest, ToolResponse};
///
/// # async fn example() {
/// let builder = PipelineBuilder::from_config(&PipelineConfig::default());
/// let metrics = builder.metrics();
/// let handler = builder.build(Handler::new(|_req| async {
///     Ok(ToolResponse::success(json!({"ok": true})))
/// }));
///
/// handler.call(ToolRequest::new("ping", json!({}))).await.unwrap();
/// assert_eq!(metrics.metrics().total_requests, 1);
/// # }
/// ```
#[derive(Clone)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    metrics: Metrics,
    extras: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extras: Vec<&str> = self.extras.iter().map(|m| m.name()).collect();
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("extras", &extras)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self::from_config(&PipelineConfig::default())
    }

    /// Starts from `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            metrics: Metrics::new(),
            extras: Vec::new(),
        }
    }

    /// Appends a middleware after the standard stack.
    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.extras.push(Arc::new(middleware));
        self
    }

    /// Handle to the metrics collector every built handler reports to.
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// The assembled chain, without a terminal handler.
    pub fn chain(&self) -> Chain {
        Chain::new()
            .with(RequestId)
            .with(Recovery::new(self.config.recovery()))
            .with(Logging::new(self.config.logging()))
            .with(Timing::new(self.config.timing()))
            .with(self.metrics.clone())
            .append(self.extras.iter().cloned())
    }

    /// Wraps `terminal` in the chain.
    pub fn build(&self, terminal: Handler) -> Handler {
        self.chain().then(terminal)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolpipe_core::middleware::NoOp;
    use toolpipe_core::test_helpers::{echo_handler, panicking_handler, request};

    #[test]
    fn standard_order() {
        let chain = PipelineBuilder::new().with_middleware(NoOp).chain();
        assert_eq!(
            chain.names(),
            vec!["request_id", "recovery", "logging", "timing", "metrics", "noop"]
        );
    }

    #[tokio::test]
    async fn clones_share_metrics() {
        let builder = PipelineBuilder::new();
        let copy = builder.clone();
        let handler = copy.build(echo_handler());

        handler.call(request("ping", json!({}))).await.unwrap();
        assert_eq!(builder.metrics().metrics().total_requests, 1);
        assert_eq!(builder.metrics().tool_metrics("ping").unwrap().success_calls, 1);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let handler = PipelineBuilder::new().build(panicking_handler("boom"));
        let err = handler.call(request("explode", json!({}))).await.unwrap_err();
        assert!(err.is_panic());
    }
}
