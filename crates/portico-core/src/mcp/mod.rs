//! Model Context Protocol (MCP) client layer.
//!
//! This module provides the client side of MCP: JSON-RPC message types,
//! the three transports (stdio subprocess, SSE, streamable-HTTP), a client
//! that performs the initialize handshake and dispatches requests, and the
//! content flattening applied to tool results.

pub mod client;
pub mod content;
pub mod error;
pub mod messages;
pub mod transport;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::McpClient;
pub use content::flatten_tool_result;
pub use error::{McpError, Result};

/// The protocol version this gateway speaks and advertises.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Default read timeout for remote transports, in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 900;

/// MCP transport trait for the three transport implementations.
#[async_trait::async_trait]
pub trait McpTransport: Send + Sync {
    /// Connect to the MCP server.
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the MCP server.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send one JSON-RPC message to the server.
    async fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Receive the next JSON-RPC message from the server.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// A tool discovered from an upstream via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name, unique per upstream.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema.
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    /// Output JSON Schema, when the tool declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Tool annotations, passed through untyped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// MCP tool-result content (text, image, or embedded resource).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    /// Text content.
    Text {
        /// Text payload, frequently JSON-encoded by upstreams.
        text: String,
    },
    /// Image content.
    #[serde(rename_all = "camelCase")]
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Embedded resource content.
    Resource {
        /// The resource body.
        resource: ResourceContents,
    },
}

/// The body of an embedded resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Inline text, when the resource is textual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The result of a `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Result content items.
    #[serde(default)]
    pub content: Vec<McpContent>,
    /// Whether the upstream flagged the call as failed.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    /// Structured result, when the tool declares an output schema.
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}
