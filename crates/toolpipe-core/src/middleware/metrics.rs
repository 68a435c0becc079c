//! Request counters, global and per tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::chain::{Handler, HandlerResult, Middleware};
use crate::envelope::ToolRequest;

/// Aggregate counters across every tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetrics {
    /// Every request seen.
    pub total_requests: u64,
    /// Requests that returned a non-error response.
    pub success_requests: u64,
    /// Requests that failed or returned an error response.
    pub error_requests: u64,
    /// Sum of all durations.
    pub total_duration: Duration,
    /// Shortest request. `Duration::MAX` until the first request.
    pub min_duration: Duration,
    /// Longest request.
    pub max_duration: Duration,
}

/// Counters for a single tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMetrics {
    /// The tool these counters describe.
    pub tool_name: String,
    /// Every call to the tool.
    pub total_calls: u64,
    /// Calls that returned a non-error response.
    pub success_calls: u64,
    /// Calls that failed or returned an error response.
    pub error_calls: u64,
    /// Sum of all durations.
    pub total_duration: Duration,
    /// Shortest call. `Duration::MAX` until the first call.
    pub min_duration: Duration,
    /// Longest call.
    pub max_duration: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    total: u64,
    success: u64,
    error: u64,
    total_duration: Duration,
    min_duration: Duration,
    max_duration: Duration,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total: 0,
            success: 0,
            error: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
        }
    }
}

impl Counters {
    fn record(&mut self, success: bool, elapsed: Duration) {
        self.total += 1;
        if success {
            self.success += 1;
        } else {
            self.error += 1;
        }
        self.total_duration = self.total_duration.saturating_add(elapsed);
        self.min_duration = self.min_duration.min(elapsed);
        self.max_duration = self.max_duration.max(elapsed);
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl From<Counters> for RequestMetrics {
    fn from(c: Counters) -> Self {
        Self {
            total_requests: c.total,
            success_requests: c.success,
            error_requests: c.error,
            total_duration: c.total_duration,
            min_duration: c.min_duration,
            max_duration: c.max_duration,
        }
    }
}

impl RequestMetrics {
    /// Mean duration, zero when nothing was recorded.
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.total_requests)
    }

    /// Fraction of successful requests in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        rate(self.success_requests, self.total_requests)
    }
}

impl ToolMetrics {
    fn from_counters(tool_name: &str, c: Counters) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            total_calls: c.total,
            success_calls: c.success,
            error_calls: c.error,
            total_duration: c.total_duration,
            min_duration: c.min_duration,
            max_duration: c.max_duration,
        }
    }

    /// Mean duration, zero when nothing was recorded.
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.total_calls)
    }

    /// Fraction of successful calls in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        rate(self.success_calls, self.total_calls)
    }
}

#[derive(Debug, Default)]
struct State {
    global: Counters,
    per_tool: HashMap<String, Counters>,
}

/// Collects request counts and durations.
///
/// Clones share the same counters, so keep one handle to read the numbers
/// and put another in the chain.
///
/// A request counts as a success when the handler returned `Ok` with a
/// response whose `is_error` is false. Everything else is an error.
///
/// ```rust
/// use serde_json::json;
/// use toolpipe_core::{Chain, Handler, ToolRequest, ToolResponse};
/// use toolpipe_core::middleware::Metrics;
///
/// # async fn example() {
/// let metrics = Metrics::new();
/// let handler = Chain::new()
///     .with(metrics.clone())
///     .then(Handler::new(|_req: ToolRequest| async { Ok(ToolResponse::success("ok")) }));
///
/// handler.call(ToolRequest::new("list_accounts", json!({}))).await.unwrap();
/// assert_eq!(metrics.metrics().total_requests, 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    state: Arc<Mutex<State>>,
}

impl Metrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, tool_name: &str, success: bool, elapsed: Duration) {
        let mut state = self.state.lock();
        state.global.record(success, elapsed);
        state
            .per_tool
            .entry(tool_name.to_string())
            .or_default()
            .record(success, elapsed);
    }

    /// Snapshot of the global counters.
    pub fn metrics(&self) -> RequestMetrics {
        self.state.lock().global.into()
    }

    /// Snapshot of one tool's counters, if the tool has been called.
    pub fn tool_metrics(&self, tool_name: &str) -> Option<ToolMetrics> {
        self.state
            .lock()
            .per_tool
            .get(tool_name)
            .map(|c| ToolMetrics::from_counters(tool_name, *c))
    }

    /// Snapshot of every tool's counters, keyed by tool name.
    pub fn all_tool_metrics(&self) -> HashMap<String, ToolMetrics> {
        self.state
            .lock()
            .per_tool
            .iter()
            .map(|(name, c)| (name.clone(), ToolMetrics::from_counters(name, *c)))
            .collect()
    }

    /// Clears every counter.
    pub fn reset(&self) {
        *self.state.lock() = State::default();
    }
}

fn is_success(result: &HandlerResult) -> bool {
    matches!(result, Ok(response) if !response.is_error)
}

impl Middleware for Metrics {
    fn name(&self) -> &str {
        "metrics"
    }

    fn process(&self, next: Handler) -> Handler {
        let metrics = self.clone();
        Handler::new(move |request: ToolRequest| {
            let next = next.clone();
            let metrics = metrics.clone();
            async move {
                let tool_name = request.tool_name.clone();
                let start = Instant::now();
                let result = next.call(request).await;
                metrics.record(&tool_name, is_success(&result), start.elapsed());
                result
            }
        })
    }
}
