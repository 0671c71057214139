//! Streamable-HTTP transport for MCP servers.
//!
//! Every JSON-RPC message is POSTed to the server URL. Responses arrive
//! either as a JSON body or as a short SSE stream of `data:` lines; both
//! are buffered for `receive`. The server may assign a session through the
//! `Mcp-Session-Id` header, which is echoed on every later request.

use super::sse::SseParser;
use crate::mcp::{DEFAULT_READ_TIMEOUT_SECS, McpError, McpTransport, PROTOCOL_VERSION, Result};
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::warn;

/// Streamable-HTTP transport implementation for MCP servers.
pub struct StreamableHttpTransport {
    /// Server URL.
    url: String,
    /// Extra request headers from the upstream config.
    headers: BTreeMap<String, String>,
    /// Read timeout applied to response bodies.
    read_timeout: Duration,
    /// HTTP client.
    client: reqwest::Client,
    /// Session id assigned by the server, if any.
    session_id: Option<String>,
    /// Buffered responses not yet consumed by `receive`.
    pending: VecDeque<Vec<u8>>,
    /// Connection status.
    connected: bool,
}

impl StreamableHttpTransport {
    /// Create a new streamable-HTTP transport.
    pub fn new(
        url: String,
        headers: BTreeMap<String, String>,
        read_timeout: Option<u64>,
    ) -> Self {
        Self {
            url,
            headers,
            read_timeout: Duration::from_secs(read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT_SECS)),
            client: reqwest::Client::new(),
            session_id: None,
            pending: VecDeque::new(),
            connected: false,
        }
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Accept", "application/json, text/event-stream");
        if let Some(ref session_id) = self.session_id {
            request = request.header("Mcp-Session-Id", session_id.as_str());
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn buffer_sse_body(&mut self, response: reqwest::Response) -> Result<()> {
        let read_timeout = self.read_timeout;
        let pending = &mut self.pending;
        let drain = async {
            let mut parser = SseParser::default();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk
                    .map_err(|e| McpError::Transport(format!("Failed to read SSE body: {}", e)))?;
                for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                    if event.event == "message" {
                        pending.push_back(event.data.into_bytes());
                    }
                }
            }
            Ok::<(), McpError>(())
        };
        tokio::time::timeout(read_timeout, drain)
            .await
            .map_err(|_| McpError::ReadTimeout(read_timeout.as_secs()))?
    }
}

#[async_trait::async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(McpError::Connection("Already connected".to_string()));
        }
        reqwest::Url::parse(&self.url)
            .map_err(|e| McpError::Config(format!("Invalid URL '{}': {}", self.url, e)))?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        // Best effort: tell the server the session is over.
        if let Some(session_id) = self.session_id.take() {
            let result = self
                .client
                .delete(&self.url)
                .header("Mcp-Session-Id", session_id)
                .send()
                .await;
            if let Err(e) = result {
                warn!("Failed to close streamable-HTTP session: {}", e);
            }
        }
        self.pending.clear();
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }

        let response = self
            .apply_headers(self.client.post(&self.url))
            .header("Content-Type", "application/json")
            .body(message.to_vec())
            .send()
            .await
            .map_err(|e| {
                McpError::Transport(format!("Failed to send message to {}: {}", self.url, e))
            })?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "HTTP endpoint returned error: {}",
                response.status()
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        // 202 acknowledges a notification; there is no body to buffer.
        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            self.buffer_sse_body(response).await?;
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| McpError::Transport(format!("Failed to read response body: {}", e)))?;
            if !body.is_empty() {
                self.pending.push_back(body.to_vec());
            }
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }
        self.pending
            .pop_front()
            .ok_or_else(|| McpError::Connection("No messages available".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
