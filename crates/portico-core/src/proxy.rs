//! Raw-MCP proxy filtering.
//!
//! The proxy listener forwards JSON-RPC between clients and upstream
//! sessions. These functions implement the inline filter: `tools/list`
//! results lose entries for disabled tools, and inbound `tools/call`
//! requests naming a disabled tool are answered with a JSON-RPC 403 error
//! without reaching the upstream.
//!
//! On the aggregate mount (no fixed server), the owning server of a tool is
//! inferred in this order: a `server__tool` name prefix, the tool's
//! `annotations.server`, then a scan of recorded state.

use crate::state::StateQuery;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Resolution of a tool name to its owning server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    /// Owning server name.
    pub server: String,
    /// Tool name with any `server__` prefix stripped.
    pub bare_name: String,
}

/// Resolves the owning server for a tool seen on the aggregate mount.
pub fn resolve_server_for_tool(
    tool_name: &str,
    annotations: Option<&Value>,
    state: &dyn StateQuery,
) -> Option<ResolvedTool> {
    if let Some((server, bare)) = tool_name.split_once("__") {
        return Some(ResolvedTool { server: server.to_string(), bare_name: bare.to_string() });
    }
    if let Some(server) = annotations
        .and_then(|a| a.get("server"))
        .and_then(Value::as_str)
    {
        return Some(ResolvedTool {
            server: server.to_string(),
            bare_name: tool_name.to_string(),
        });
    }
    for server in state.known_servers() {
        if !state.is_tool_enabled(&server, tool_name) {
            return Some(ResolvedTool { server, bare_name: tool_name.to_string() });
        }
    }
    None
}

fn tool_enabled(state: &dyn StateQuery, server: &str, full_name: &str, bare_name: &str) -> bool {
    state.is_tool_enabled(server, bare_name) && state.is_tool_enabled(server, full_name)
}

/// Filters one JSON-RPC message in place, removing disabled tools from any
/// `result.tools` array. `server` is set on per-upstream mounts and absent
/// on the aggregate mount.
pub fn filter_message(message: &mut Value, server: Option<&str>, state: &dyn StateQuery) {
    let Some(tools) = message
        .get_mut("result")
        .and_then(|r| r.get_mut("tools"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    let before = tools.len();
    tools.retain(|tool| {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
        match server {
            Some(server) => tool_enabled(state, server, name, name),
            None => match resolve_server_for_tool(name, tool.get("annotations"), state) {
                Some(resolved) => tool_enabled(state, &resolved.server, name, &resolved.bare_name),
                // Unattributable tools pass through.
                None => true,
            },
        }
    });
    if tools.len() != before {
        info!("Filtered tools/list: {} -> {} tools", before, tools.len());
    }
}

/// Filters a JSON-RPC payload, handling both single messages and batches.
pub fn filter_payload(payload: &mut Value, server: Option<&str>, state: &dyn StateQuery) {
    match payload {
        Value::Array(batch) => {
            for message in batch {
                filter_message(message, server, state);
            }
        }
        message => filter_message(message, server, state),
    }
}

/// Checks an inbound request and returns a JSON-RPC error response when it
/// is a `tools/call` for a disabled tool. `None` means forward it.
pub fn check_tools_call(
    request: &Value,
    server: Option<&str>,
    state: &dyn StateQuery,
) -> Option<Value> {
    if request.get("method").and_then(Value::as_str) != Some("tools/call") {
        return None;
    }
    let tool_name = request
        .get("params")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let resolved = match server {
        Some(server) => {
            ResolvedTool { server: server.to_string(), bare_name: tool_name.to_string() }
        }
        None => resolve_server_for_tool(tool_name, None, state)?,
    };

    if tool_enabled(state, &resolved.server, tool_name, &resolved.bare_name)
        && state.is_server_enabled(&resolved.server)
    {
        return None;
    }

    warn!("Blocked call to disabled tool: {}/{}", resolved.server, tool_name);
    Some(json!({
        "jsonrpc": "2.0",
        "id": request.get("id").cloned().unwrap_or(Value::Null),
        "error": {
            "code": 403,
            "message": format!("Tool '{}' is disabled", tool_name),
            "data": {"tool": tool_name, "server": resolved.server},
        },
    }))
}
