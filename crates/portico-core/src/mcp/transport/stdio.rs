//! Stdio transport for MCP servers.
//!
//! Spawns the configured command as a child process and speaks
//! newline-delimited JSON-RPC over its pipes. The child inherits the
//! gateway's environment merged with the upstream's `env` map (placeholders
//! already expanded at config load).

use crate::mcp::{McpError, McpTransport, Result};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// Stdio transport implementation for MCP servers.
pub struct StdioTransport {
    /// Command to execute.
    command: String,
    /// Command arguments.
    args: Vec<String>,
    /// Extra environment merged over the process environment.
    env: BTreeMap<String, String>,
    /// Child process (if running).
    child: Option<Child>,
    /// Stdin handle.
    stdin: Option<tokio::process::ChildStdin>,
    /// Stdout reader.
    stdout: Option<BufReader<tokio::process::ChildStdout>>,
    /// Connection status.
    connected: bool,
}

impl StdioTransport {
    /// Create a new stdio transport.
    pub fn new(command: String, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self { command, args, env, child: None, stdin: None, stdout: None, connected: false }
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(McpError::Connection("Already connected".to_string()));
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Transport(format!("Failed to spawn process: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to get stdout handle".to_string()))?;

        // Drain stderr so the child never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(command = %command, "upstream stderr: {}", line);
                }
            });
        }

        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        self.connected = true;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        self.stdin = None;
        self.stdout = None;
        self.connected = false;

        Ok(())
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Transport("Stdin not available".to_string()))?;

        stdin
            .write_all(message)
            .await
            .map_err(|e| McpError::Transport(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::Transport(format!("Failed to write newline: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to flush stdin: {}", e)))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(McpError::Connection("Not connected".to_string()));
        }

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::Transport("Stdout not available".to_string()))?;

        loop {
            let mut line = String::new();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Transport(format!("Failed to read from stdout: {}", e)))?;

            if read == 0 {
                return Err(McpError::Connection("Connection closed".to_string()));
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(trimmed.as_bytes().to_vec());
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
