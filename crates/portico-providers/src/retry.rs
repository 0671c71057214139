//! Retry policy shared by the provider adapters.
//!
//! Transient provider failures (429 and 5xx) retry with exponential
//! backoff up to a small bounded count; network errors retry once.

use std::time::Duration;

/// Default retry count when `<PROVIDER>_MAX_RETRIES` is unset.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default request timeout in seconds when `<PROVIDER>_TIMEOUT` is unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Whether an HTTP status is worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Exponential backoff delay for the given zero-based attempt.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(500_u64.saturating_mul(1 << attempt.min(6)))
}

/// Reads a provider tuning variable, e.g. `OPENROUTER_MAX_RETRIES`.
pub fn env_tuning(prefix: &str, suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", prefix, suffix)).ok()
}

/// Max retries for a provider, from env or the default.
pub fn max_retries(prefix: &str) -> u32 {
    env_tuning(prefix, "MAX_RETRIES")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Request timeout for a provider, from env or the default.
pub fn timeout(prefix: &str) -> Duration {
    let secs = env_tuning(prefix, "TIMEOUT")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
