//! Error types for MCP operations.

use std::io;
use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Connection error.
    #[error("MCP connection error: {0}")]
    Connection(String),

    /// Transport error.
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// Protocol error.
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error returned by the upstream.
    #[error("MCP upstream error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the upstream.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Handshake timed out or the upstream stopped responding.
    #[error("MCP read timed out after {0} seconds")]
    ReadTimeout(u64),

    /// Configuration error.
    #[error("MCP configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
