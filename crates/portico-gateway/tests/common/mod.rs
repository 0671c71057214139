//! Shared fixtures: a scripted stdio MCP server driven by `sh`.

use portico_core::config::GatewayConfig;
use portico_core::{LogBus, StateManager, Supervisor};
use portico_gateway::{AppState, RuntimeSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A shell MCP server exposing two tools: `slow` (sleeps 200ms before
/// answering) and `echo` (requires a string `text` argument). Responses
/// echo the request id so correlation works for any call order.
const FIXTURE_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","serverInfo":{"name":"fixture","version":"1.0"},"capabilities":{"tools":{}}}}\n' "$id";;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"slow","description":"sleeps then replies","inputSchema":{"type":"object","properties":{}}},{"name":"echo","description":"echoes text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}\n' "$id";;
    *'"name":"slow"'*)
      sleep 0.2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"finally"}],"isError":false}}\n' "$id";;
    *'"name":"echo"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"echoed\\":true}"}],"isError":false}}\n' "$id";;
  esac
done
"#;

/// Writes the fixture script and returns its path.
pub fn write_fixture_script(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("fixture_server.sh");
    std::fs::write(&path, FIXTURE_SCRIPT).expect("write fixture script");
    path
}

/// Builds an AppState with the fixture server mounted as `fix`.
pub async fn app_with_fixture(settings: RuntimeSettings) -> (AppState, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let script = write_fixture_script(&dir);

    let config_raw = format!(
        r#"{{"mcpServers": {{"fix": {{"command": "sh", "args": ["{}"]}}}}}}"#,
        script.display()
    );
    let config = GatewayConfig::from_json(&config_raw).expect("fixture config");

    let supervisor = Supervisor::new();
    supervisor.mount_all(config).await;

    let state = Arc::new(StateManager::new(dir.path().join("portico_state.json")));
    let logbus = Arc::new(LogBus::new(2000));
    let app = AppState::new(supervisor, state, logbus, settings);

    let session = app.supervisor().get("fix").expect("fixture mounted");
    assert!(session.is_connected(), "fixture server must connect: {:?}", session.last_error());
    (app, dir)
}
