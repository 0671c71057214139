//! Tool execution with bounded deadlines and metrics.

use crate::error::{ErrorCode, GatewayError};
use crate::mcp::content::{first_text, flatten_tool_result};
use crate::metrics::MetricsAggregator;
use crate::supervisor::UpstreamSession;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, warn};

/// Failure modes of one tool execution.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The requested timeout exceeds the allowed maximum.
    #[error("Timeout out of allowed range")]
    InvalidTimeout {
        /// The maximum allowed timeout in seconds.
        max: f64,
    },

    /// The deadline fired before the upstream answered.
    #[error("Tool timed out")]
    Timeout,

    /// The upstream flagged the call as failed.
    #[error("{message}")]
    Upstream {
        /// Error text from the first content item.
        message: String,
        /// Structured error payload when the text parsed as JSON.
        data: Option<Value>,
    },

    /// The upstream rejected the call with a JSON-RPC protocol error.
    #[error("{message}")]
    Rpc {
        /// Numeric JSON-RPC error code.
        code: i64,
        /// Error message from the upstream.
        message: String,
        /// Optional structured error data.
        data: Option<Value>,
    },

    /// Transport or protocol failure.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<RunnerError> for GatewayError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::InvalidTimeout { max } => {
                GatewayError::new(ErrorCode::InvalidTimeout, "Timeout out of allowed range")
                    .with_data(serde_json::json!({"max": max}))
            }
            RunnerError::Timeout => GatewayError::new(ErrorCode::Timeout, "Tool timed out"),
            RunnerError::Upstream { message, data } => {
                let mut gateway_err = GatewayError::new(ErrorCode::Unexpected, message);
                gateway_err.data = data;
                gateway_err
            }
            RunnerError::Rpc { code, message, data } => {
                let mut gateway_err = GatewayError::new(ErrorCode::Mcp(code), message);
                gateway_err.data = data;
                gateway_err
            }
            RunnerError::Unexpected(message) => GatewayError::unexpected(message),
        }
    }
}

/// Executes tool calls with a cancellable deadline and per-tool metrics.
pub struct Runner {
    metrics: Arc<MetricsAggregator>,
}

impl Runner {
    /// Creates a runner recording into the given aggregator.
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self { metrics }
    }

    /// The metrics aggregator this runner records into.
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Executes one tool call.
    ///
    /// The metric entry is keyed by `endpoint_name` (conventionally
    /// `upstream/tool`) and is updated on every outcome. The flattened
    /// result value is returned on success.
    ///
    /// # Errors
    /// `InvalidTimeout` when `timeout > max_timeout`, `Timeout` when the
    /// deadline fires, `Upstream` for isError results, `Unexpected` for
    /// transport failures.
    pub async fn execute(
        &self,
        session: &UpstreamSession,
        tool_name: &str,
        endpoint_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
        max_timeout: Option<Duration>,
    ) -> Result<Value, RunnerError> {
        if let (Some(timeout), Some(max)) = (timeout, max_timeout) {
            if timeout > max {
                return Err(RunnerError::InvalidTimeout { max: max.as_secs_f64() });
            }
        }

        let started = Instant::now();
        let call = session.call_tool(tool_name, arguments);
        let result = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record_execution(endpoint_name, started.elapsed(), false);
                    warn!("Tool {} timed out after {:?}", endpoint_name, deadline);
                    return Err(RunnerError::Timeout);
                }
            },
            None => call.await,
        };

        let elapsed = started.elapsed();
        match result {
            Ok(tool_result) if tool_result.is_error => {
                self.metrics.record_execution(endpoint_name, elapsed, false);
                let message =
                    first_text(&tool_result).unwrap_or_else(|| "Unknown tool execution error".to_string());
                let data = serde_json::from_str::<Value>(&message).ok();
                Err(RunnerError::Upstream { message, data })
            }
            Ok(tool_result) => {
                self.metrics.record_execution(endpoint_name, elapsed, true);
                Ok(flatten_tool_result(&tool_result))
            }
            Err(crate::mcp::McpError::Rpc { code, message, data }) => {
                self.metrics.record_execution(endpoint_name, elapsed, false);
                error!("Upstream rejected {} with code {}: {}", endpoint_name, code, message);
                Err(RunnerError::Rpc { code, message, data })
            }
            Err(e) => {
                self.metrics.record_execution(endpoint_name, elapsed, false);
                error!("Unexpected error executing {}: {}", endpoint_name, e);
                Err(RunnerError::Unexpected(e.to_string()))
            }
        }
    }
}
