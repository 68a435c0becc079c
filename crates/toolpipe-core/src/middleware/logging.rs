//! Leveled request/response logging.

use std::fmt;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::chain::{Handler, Middleware};
use crate::envelope::ToolRequest;

/// Minimum severity the [`Logging`] middleware emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Also logs arguments and request metadata.
    Debug,
    /// Request start and completion.
    #[default]
    Info,
    /// Only error responses and failures.
    Warn,
    /// Only failures.
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no [`LogLevel`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}' (expected debug, info, warn or error)")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Configuration for [`Logging`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Lines below this level are suppressed.
    pub level: LogLevel,
}

/// Logs each request on the way in and its outcome on the way out.
///
/// | When | Line | Emitted at or above |
/// |------|------|---------------------|
/// | before `next` | tool, request id, start time | `Info` |
/// | before `next` | arguments, metadata | `Debug` |
/// | after, `Err` | error | `Error` |
/// | after, `is_error` response | warning | `Warn` |
/// | after, success | completion | `Info` |
///
/// The result is never altered.
#[derive(Debug, Clone, Default)]
pub struct Logging {
    config: LoggingConfig,
}

impl Logging {
    /// Creates a logging middleware with the given configuration.
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Creates a logging middleware at `level`.
    pub fn with_level(level: LogLevel) -> Self {
        Self::new(LoggingConfig { level })
    }

    /// The configured minimum level.
    pub fn level(&self) -> LogLevel {
        self.config.level
    }
}

impl Middleware for Logging {
    fn name(&self) -> &str {
        "logging"
    }

    fn process(&self, next: Handler) -> Handler {
        let level = self.config.level;
        Handler::new(move |request: ToolRequest| {
            let next = next.clone();
            async move {
                let tool_name = request.tool_name.clone();
                let request_id = request.request_id().to_string();

                if level <= LogLevel::Info {
                    let started_ms = request
                        .received_at()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    tracing::info!(
                        tool = %tool_name,
                        request_id = %request_id,
                        started_ms,
                        "tool request started"
                    );
                }
                if level == LogLevel::Debug {
                    tracing::debug!(
                        tool = %tool_name,
                        request_id = %request_id,
                        arguments = %request.arguments,
                        metadata = ?request.metadata,
                        "tool request details"
                    );
                }

                let start = request.start_time();
                let result = next.call(request).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match &result {
                    Err(err) => {
                        tracing::error!(
                            tool = %tool_name,
                            request_id = %request_id,
                            duration_ms,
                            error = %err,
                            "tool request failed"
                        );
                    }
                    Ok(response) if response.is_error => {
                        if level <= LogLevel::Warn {
                            tracing::warn!(
                                tool = %tool_name,
                                request_id = %request_id,
                                duration_ms,
                                content = %response.content(),
                                "tool returned an error response"
                            );
                        }
                    }
                    Ok(_) => {
                        if level <= LogLevel::Info {
                            tracing::info!(
                                tool = %tool_name,
                                request_id = %request_id,
                                duration_ms,
                                "tool request completed"
                            );
                        }
                    }
                }

                result
            }
        })
    }
}
