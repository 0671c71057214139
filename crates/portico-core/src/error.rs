//! Gateway error taxonomy.
//!
//! Every failure surfaced over HTTP carries a stable string code from
//! [`ErrorCode`]; the envelope layer maps the code to a status line.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes used in the failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Mutating endpoint hit while the gateway is in read-only mode.
    ReadOnly,
    /// No configuration file is loaded.
    NoConfig,
    /// Request failed validation.
    Invalid,
    /// Request body is not valid JSON.
    InvalidJson,
    /// Timeout override is non-numeric or out of range.
    InvalidTimeout,
    /// Tool execution exceeded its deadline.
    Timeout,
    /// Server or tool is disabled.
    Disabled,
    /// Protocol-version header mismatch under enforce mode.
    Protocol,
    /// Referenced server, tool, or session does not exist.
    NotFound,
    /// Resource already exists.
    Exists,
    /// Filesystem error while reading or writing config/state.
    IoError,
    /// Hot reload failed and was rolled back.
    ReloadFailed,
    /// Session re-initialization failed.
    ReinitFailed,
    /// Upstream response failed output-schema validation under enforce mode.
    OutputValidation,
    /// Upstream JSON-RPC protocol error, carrying its numeric code.
    Mcp(i64),
    /// Anything not covered above.
    Unexpected,
}

impl ErrorCode {
    /// Stable snake_case identifier, as serialized in envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ReadOnly => "read_only",
            ErrorCode::NoConfig => "no_config",
            ErrorCode::Invalid => "invalid",
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::InvalidTimeout => "invalid_timeout",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Disabled => "disabled",
            ErrorCode::Protocol => "protocol",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Exists => "exists",
            ErrorCode::IoError => "io_error",
            ErrorCode::ReloadFailed => "reload_failed",
            ErrorCode::ReinitFailed => "reinit_failed",
            ErrorCode::OutputValidation => "output_validation",
            ErrorCode::Mcp(_) => "mcp_error",
            ErrorCode::Unexpected => "unexpected",
        }
    }

    /// HTTP status associated with this code.
    ///
    /// Upstream JSON-RPC codes map like the MCP library's standard set:
    /// parse/invalid-request are client errors, method-not-found is 404,
    /// invalid-params is 422, everything else is a 500.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::ReadOnly | ErrorCode::Disabled => 403,
            ErrorCode::NoConfig
            | ErrorCode::Invalid
            | ErrorCode::InvalidJson
            | ErrorCode::InvalidTimeout => 400,
            ErrorCode::Timeout => 504,
            ErrorCode::Protocol => 426,
            ErrorCode::NotFound => 404,
            ErrorCode::Exists => 409,
            ErrorCode::OutputValidation => 502,
            ErrorCode::Mcp(JSONRPC_PARSE_ERROR | JSONRPC_INVALID_REQUEST) => 400,
            ErrorCode::Mcp(JSONRPC_METHOD_NOT_FOUND) => 404,
            ErrorCode::Mcp(JSONRPC_INVALID_PARAMS) => 422,
            ErrorCode::Mcp(_)
            | ErrorCode::IoError
            | ErrorCode::ReloadFailed
            | ErrorCode::ReinitFailed
            | ErrorCode::Unexpected => 500,
        }
    }
}

/// JSON-RPC 2.0 parse error.
pub const JSONRPC_PARSE_ERROR: i64 = -32700;
/// JSON-RPC 2.0 invalid request.
pub const JSONRPC_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC 2.0 method not found.
pub const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC 2.0 invalid params.
pub const JSONRPC_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC 2.0 internal error.
pub const JSONRPC_INTERNAL_ERROR: i64 = -32603;

/// A gateway-level failure: a code, a message, and optional structured data.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail (e.g., `{"max": 5}` for timeout bounds).
    pub data: Option<serde_json::Value>,
}

impl GatewayError {
    /// Creates an error with a code and message.
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self { code, message: message.into(), data: None }
    }

    /// Attaches structured detail.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Shorthand for a `not_found` error.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Shorthand for a `read_only` error.
    pub fn read_only() -> Self {
        Self::new(ErrorCode::ReadOnly, "Gateway is in read-only mode")
    }

    /// Shorthand for an `unexpected` error.
    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Unexpected, message)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::new(ErrorCode::IoError, err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::new(ErrorCode::InvalidJson, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::ReadOnly.as_str(), "read_only");
        assert_eq!(ErrorCode::InvalidTimeout.as_str(), "invalid_timeout");
        assert_eq!(ErrorCode::OutputValidation.as_str(), "output_validation");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::Disabled.http_status(), 403);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
        assert_eq!(ErrorCode::Protocol.http_status(), 426);
        assert_eq!(ErrorCode::InvalidTimeout.http_status(), 400);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::OutputValidation.http_status(), 502);
        assert_eq!(ErrorCode::Unexpected.http_status(), 500);
    }

    #[test]
    fn test_mcp_numeric_codes_split_statuses() {
        assert_eq!(ErrorCode::Mcp(JSONRPC_PARSE_ERROR).http_status(), 400);
        assert_eq!(ErrorCode::Mcp(JSONRPC_INVALID_REQUEST).http_status(), 400);
        assert_eq!(ErrorCode::Mcp(JSONRPC_METHOD_NOT_FOUND).http_status(), 404);
        assert_eq!(ErrorCode::Mcp(JSONRPC_INVALID_PARAMS).http_status(), 422);
        assert_eq!(ErrorCode::Mcp(JSONRPC_INTERNAL_ERROR).http_status(), 500);
        // Server-defined codes outside the standard set are internal errors.
        assert_eq!(ErrorCode::Mcp(-32000).http_status(), 500);
        assert_eq!(ErrorCode::Mcp(42).http_status(), 500);
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::new(ErrorCode::Timeout, "Tool timed out");
        assert_eq!(err.to_string(), "Tool timed out");
    }

    #[test]
    fn test_gateway_error_with_data() {
        let err = GatewayError::new(ErrorCode::InvalidTimeout, "Timeout out of allowed range")
            .with_data(serde_json::json!({"max": 5}));
        assert_eq!(err.data.unwrap()["max"], 5);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: GatewayError = io_err.into();
        assert_eq!(err.code, ErrorCode::IoError);
    }

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::ReloadFailed).unwrap();
        assert_eq!(json, "\"reload_failed\"");
    }
}
