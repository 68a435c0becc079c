//! Wall-clock timing.

use std::time::{Duration, Instant};

use crate::chain::{Handler, Middleware};
use crate::envelope::{ToolRequest, ToolResponse};

/// Requests slower than this are reported unless configured otherwise.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

/// Configuration for [`Timing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Elapsed time above which a "slow request" warning is logged.
    pub slow_request_threshold: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
        }
    }
}

/// Measures the time spent in `next` and records it on the response.
///
/// Sets [`ToolResponse::duration`] and the `duration_ms` / `duration_ns`
/// metadata entries. Errors carrying a response (panics, timeouts) get the
/// same annotation.
#[derive(Debug, Clone, Default)]
pub struct Timing {
    config: TimingConfig,
}

impl Timing {
    /// Creates a timing middleware with the given configuration.
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    /// Creates a timing middleware with a custom slow-request threshold.
    pub fn with_threshold(threshold: Duration) -> Self {
        Self::new(TimingConfig {
            slow_request_threshold: threshold,
        })
    }
}

fn annotate(response: &mut ToolResponse, elapsed: Duration) {
    response.duration = elapsed;
    response
        .metadata
        .insert("duration_ms".into(), (elapsed.as_millis() as u64).into());
    response
        .metadata
        .insert("duration_ns".into(), (elapsed.as_nanos() as u64).into());
}

impl Middleware for Timing {
    fn name(&self) -> &str {
        "timing"
    }

    fn process(&self, next: Handler) -> Handler {
        let threshold = self.config.slow_request_threshold;
        Handler::new(move |request: ToolRequest| {
            let next = next.clone();
            async move {
                let tool_name = request.tool_name.clone();
                let request_id = request.request_id().to_string();

                let start = Instant::now();
                let mut result = next.call(request).await;
                let elapsed = start.elapsed();

                match &mut result {
                    Ok(response) => annotate(response, elapsed),
                    Err(err) => {
                        if let Some(response) = err.response_mut() {
                            annotate(response, elapsed);
                        }
                    }
                }

                if elapsed > threshold {
                    tracing::warn!(
                        tool = %tool_name,
                        request_id = %request_id,
                        duration_ms = elapsed.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        "slow request"
                    );
                }

                result
            }
        })
    }
}
