//! Server-Sent Events (SSE) transport for MCP servers.
//!
//! The handshake follows the HTTP+SSE MCP flavor: a long-lived GET stream
//! carries server messages, the first `endpoint` event names the URL that
//! requests are POSTed to, and every subsequent `message` event is one
//! JSON-RPC payload.

use crate::mcp::{DEFAULT_READ_TIMEOUT_SECS, McpError, McpTransport, PROTOCOL_VERSION, Result};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// How long to wait for the server to announce its POST endpoint.
const ENDPOINT_WAIT_SECS: u64 = 30;

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event name; "message" when the server names none.
    pub event: String,
    /// Data lines, joined by newlines.
    pub data: String,
}

/// Incremental SSE frame parser over arbitrary chunk boundaries.
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feeds a chunk and returns every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        loop {
            let normalized = self.buffer.replace("\r\n", "\n");
            let Some(split) = normalized.find("\n\n") else { break };
            let frame = normalized[..split].to_string();
            self.buffer = normalized[split + 2..].to_string();
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = "message".to_string();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Comment and id lines are ignored.
    }
    if data_lines.is_empty() && event == "message" {
        return None;
    }
    Some(SseEvent { event, data: data_lines.join("\n") })
}

/// SSE transport implementation for MCP servers.
pub struct SseTransport {
    /// Stream URL.
    url: String,
    /// Extra request headers from the upstream config.
    headers: BTreeMap<String, String>,
    /// Read timeout applied to each receive.
    read_timeout: Duration,
    /// HTTP client.
    client: reqwest::Client,
    /// POST endpoint announced by the server.
    post_url: Option<String>,
    /// Incoming JSON-RPC messages from the event stream.
    incoming: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Reader task handle, aborted on disconnect.
    reader: Option<tokio::task::JoinHandle<()>>,
    /// Connection status.
    connected: bool,
}

impl SseTransport {
    /// Create a new SSE transport.
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
            post_url: None,
            incoming: None,
            reader: None,
            connected: false,
        }
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request.header("MCP-Protocol-Version", PROTOCOL_VERSION);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(McpError::Connection("Already connected".to_string()));
        }

        let request = self
            .apply_headers(self.client.get(&self.url))
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");

        let response = request.send().await.map_err(|e| {
            McpError::Transport(format!("Failed to connect to SSE endpoint at {}: {}", self.url, e))
        })?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "SSE endpoint returned error: {}",
                response.status()
            )));
        }

        let base_url = response.url().clone();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (message_tx, message_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::default();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("SSE stream read failed: {}", e);
                        break;
                    }
                };
                for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                    match event.event.as_str() {
                        "endpoint" => {
                            let resolved = base_url
                                .join(event.data.trim())
                                .map(|u| u.to_string())
                                .unwrap_or_else(|_| event.data.trim().to_string());
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(resolved);
                            }
                        }
                        "message" => {
                            if message_tx.send(event.data.into_bytes()).is_err() {
                                return;
                            }
                        }
                        other => debug!("Ignoring SSE event type '{}'", other),
                    }
                }
            }
        });

        let post_url =
            tokio::time::timeout(Duration::from_secs(ENDPOINT_WAIT_SECS), endpoint_rx)
                .await
                .map_err(|_| {
                    McpError::Connection(
                        "SSE server did not announce an endpoint in time".to_string(),
                    )
                })?
                .map_err(|_| {
                    McpError::Connection("SSE stream closed during handshake".to_string())
                })?;

        self.post_url = Some(post_url);
        self.incoming = Some(message_rx);
        self.reader = Some(reader);
        self.connected = true;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.incoming = None;
        self.post_url = None;
        self.connected = false;

        Ok(())
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }
        let post_url = self
            .post_url
            .clone()
            .ok_or_else(|| McpError::Transport("POST endpoint not available".to_string()))?;

        let response = self
            .apply_headers(self.client.post(&post_url))
            .header("Content-Type", "application/json")
            .body(message.to_vec())
            .send()
            .await
            .map_err(|e| {
                McpError::Transport(format!("Failed to send message via SSE to {}: {}", post_url, e))
            })?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "Failed to send message: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }
        let incoming = self
            .incoming
            .as_mut()
            .ok_or_else(|| McpError::Transport("Event stream not available".to_string()))?;

        match tokio::time::timeout(self.read_timeout, incoming.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(McpError::Connection("Event stream closed".to_string())),
            Err(_) => Err(McpError::ReadTimeout(self.read_timeout.as_secs())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
