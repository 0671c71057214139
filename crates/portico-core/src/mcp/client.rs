//! MCP client implementation.
//!
//! One client owns one transport, performs the initialize handshake, and
//! correlates JSON-RPC responses with requests by id. Server-initiated
//! notifications arriving between a request and its response are logged and
//! skipped.

use crate::config::{TransportType, UpstreamConfig};
use crate::mcp::messages::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ServerInfo,
};
use crate::mcp::transport::{SseTransport, StdioTransport, StreamableHttpTransport};
use crate::mcp::{McpError, McpTransport, PROTOCOL_VERSION, Result, Tool, ToolCallResult};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// How many interleaved messages to skip while waiting for a response
/// before giving up on correlation.
const MAX_SKIPPED_MESSAGES: usize = 64;

/// MCP client for communicating with one upstream server.
pub struct McpClient {
    /// Transport implementation.
    transport: Mutex<Box<dyn McpTransport>>,
    /// Server identity from the initialize handshake.
    server_info: Option<ServerInfo>,
    /// Request ID counter.
    request_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Creates a transport for the upstream config without connecting.
    fn build_transport(config: &UpstreamConfig) -> Result<Box<dyn McpTransport>> {
        match config.transport {
            TransportType::Stdio => {
                let command = config.command.clone().ok_or_else(|| {
                    McpError::Config("Stdio transport requires 'command'".to_string())
                })?;
                let args = config.args.clone().unwrap_or_default();
                let env = config.env.clone().unwrap_or_default();
                Ok(Box::new(StdioTransport::new(command, args, env)))
            }
            TransportType::Sse => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| McpError::Config("SSE transport requires 'url'".to_string()))?;
                let headers = config.headers.clone().unwrap_or_default();
                Ok(Box::new(SseTransport::new(url, headers, config.read_timeout)))
            }
            TransportType::StreamableHttp => {
                let url = config.url.clone().ok_or_else(|| {
                    McpError::Config("Streamable-HTTP transport requires 'url'".to_string())
                })?;
                let headers = config.headers.clone().unwrap_or_default();
                Ok(Box::new(StreamableHttpTransport::new(url, headers, config.read_timeout)))
            }
        }
    }

    /// Connects to the upstream and performs the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot connect or the handshake
    /// fails.
    pub async fn connect(config: &UpstreamConfig) -> Result<Self> {
        Self::connect_over(Self::build_transport(config)?).await
    }

    /// Connects a client over an already-built transport. Used by tests and
    /// by reinit, which reuses the config-derived transport settings.
    pub async fn connect_over(mut transport: Box<dyn McpTransport>) -> Result<Self> {
        if !transport.is_connected() {
            transport.connect().await?;
        }
        let mut client = Self {
            transport: Mutex::new(transport),
            server_info: None,
            request_id: Arc::new(AtomicU64::new(0)),
        };
        let init_result = client.initialize().await?;
        client.server_info = init_result.server_info;
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "portico".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        };

        let result = self
            .send_request("initialize", Some(serde_json::to_value(&params)?))
            .await
            .map_err(|e| match e {
                McpError::Rpc { code, message, data } => McpError::Rpc {
                    code,
                    message: format!("Initialize failed: {}", message),
                    data,
                },
                other => other,
            })?;
        let init_result: InitializeResult = serde_json::from_value(result)?;

        // Acknowledge the handshake before issuing any other request.
        let initialized = JsonRpcRequest::notification("notifications/initialized", Some(json!({})));
        let mut transport = self.transport.lock().await;
        transport.send(&serde_json::to_vec(&initialized)?).await?;

        Ok(init_result)
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the upstream reports a
    /// JSON-RPC error, or the response cannot be correlated.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = JsonRpcRequest::new(id, method, params);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut transport = self.transport.lock().await;
        transport.send(&request_bytes).await?;

        for _ in 0..MAX_SKIPPED_MESSAGES {
            let response_bytes = transport.receive().await?;
            let response: JsonRpcResponse = match serde_json::from_slice(&response_bytes) {
                Ok(response) => response,
                Err(_) => {
                    // Server-initiated request or notification; not ours.
                    debug!("Skipping non-response message while waiting for '{}'", method);
                    continue;
                }
            };
            if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                debug!("Skipping response with unexpected id while waiting for '{}'", method);
                continue;
            }
            if let Some(error) = response.error {
                return Err(McpError::Rpc {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                });
            }
            return response.result.ok_or_else(|| {
                McpError::Protocol(format!("Response missing result for method '{}'", method))
            });
        }
        Err(McpError::Protocol(format!(
            "Gave up waiting for a response to '{}' after {} messages",
            method, MAX_SKIPPED_MESSAGES
        )))
    }

    /// Lists the tools the upstream advertises.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the result is malformed.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = self.send_request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list result missing 'tools'".to_string()))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Invokes one tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. An upstream `isError` result
    /// is returned as a successful `ToolCallResult` for the runner to
    /// classify.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let result = self
            .send_request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Forwards a raw JSON-RPC request without interpretation, for the
    /// proxy listener.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure only; upstream JSON-RPC errors
    /// pass through in the response value.
    pub async fn forward_raw(&self, mut message: Value) -> Result<Value> {
        // Re-key the request so upstream correlation stays unique, then
        // restore the caller's id on the way back.
        let caller_id = message.get("id").cloned();
        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        message["id"] = json!(id);
        let bytes = serde_json::to_vec(&message)?;

        let mut transport = self.transport.lock().await;
        transport.send(&bytes).await?;
        for _ in 0..MAX_SKIPPED_MESSAGES {
            let response_bytes = transport.receive().await?;
            let mut response: Value = match serde_json::from_slice(&response_bytes) {
                Ok(response) => response,
                Err(_) => continue,
            };
            if response.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            response["id"] = caller_id.unwrap_or(Value::Null);
            return Ok(response);
        }
        Err(McpError::Protocol("Gave up waiting for a proxied response".to_string()))
    }

    /// Server identity from the initialize handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Disconnects from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.disconnect().await
    }
}
