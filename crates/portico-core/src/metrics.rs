//! Call metrics: top-level counters plus per-tool latency tracking.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ErrorCode;

/// Per-tool execution counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolMetrics {
    /// Number of executions (including failures).
    pub calls: u64,
    /// Accumulated latency in seconds.
    #[serde(rename = "totalLatency")]
    pub total_latency: f64,
    /// Moving average latency in milliseconds.
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: f64,
    /// Number of failed executions.
    pub errors: u64,
}

/// Top-level error counters by envelope code.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorCounters {
    /// Requests blocked because the server or tool was disabled.
    pub disabled: u64,
    /// Requests with an invalid timeout override.
    pub invalid_timeout: u64,
    /// Executions that hit their deadline.
    pub timeout: u64,
    /// Everything else.
    pub unexpected: u64,
}

impl ErrorCounters {
    fn total(&self) -> u64 {
        self.disabled + self.invalid_timeout + self.timeout + self.unexpected
    }
}

#[derive(Debug, Default)]
struct MetricsData {
    calls_total: u64,
    errors: ErrorCounters,
    per_tool: BTreeMap<String, ToolMetrics>,
}

/// Aggregates gateway-wide call metrics behind one lock.
///
/// The top-level call counter includes pre-execution failures (disabled,
/// invalid timeout); per-tool counters only move when the runner actually
/// executes.
#[derive(Default)]
pub struct MetricsAggregator {
    data: Mutex<MetricsData>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one inbound call, before any enforcement.
    pub fn record_call(&self) {
        let mut data = self.data.lock().expect("metrics lock poisoned");
        data.calls_total += 1;
    }

    /// Counts one top-level error. Codes outside the tracked set are
    /// normalized to `unexpected`.
    pub fn record_error(&self, code: ErrorCode) {
        let mut data = self.data.lock().expect("metrics lock poisoned");
        match code {
            ErrorCode::Disabled => data.errors.disabled += 1,
            ErrorCode::InvalidTimeout => data.errors.invalid_timeout += 1,
            ErrorCode::Timeout => data.errors.timeout += 1,
            _ => data.errors.unexpected += 1,
        }
    }

    /// Records one tool execution with its latency and outcome.
    pub fn record_execution(&self, tool: &str, elapsed: Duration, success: bool) {
        let mut data = self.data.lock().expect("metrics lock poisoned");
        let metrics = data.per_tool.entry(tool.to_string()).or_default();
        metrics.calls += 1;
        metrics.total_latency += elapsed.as_secs_f64();
        metrics.avg_latency_ms = metrics.total_latency / metrics.calls as f64 * 1000.0;
        if !success {
            metrics.errors += 1;
        }
    }

    /// Per-tool counters snapshot.
    pub fn per_tool(&self) -> BTreeMap<String, ToolMetrics> {
        self.data.lock().expect("metrics lock poisoned").per_tool.clone()
    }

    /// Consolidated metrics payload for the admin surface.
    pub fn snapshot(&self) -> serde_json::Value {
        let data = self.data.lock().expect("metrics lock poisoned");
        serde_json::json!({
            "calls": data.calls_total,
            "errors": {
                "total": data.errors.total(),
                "byCode": data.errors,
            },
            "perTool": data.per_tool,
        })
    }

    /// Resets every counter.
    pub fn reset(&self) {
        let mut data = self.data.lock().expect("metrics lock poisoned");
        *data = MetricsData::default();
    }
}
