//! The per-session tool catalog.
//!
//! Every enabled tool of every enabled, connected upstream is exposed to
//! the provider as a function named `sanitize("{server}.{tool}")`, with a
//! numeric suffix on collision. The gateway's own management surface is
//! appended as `portico_*` functions dispatched in-process, so the model
//! can inspect and toggle the gateway without a network hop.

use crate::state::AppState;
use portico_abstraction::{ToolDef, ToolFunction};
use portico_core::state::StateQuery;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::info;

/// Where a catalog function dispatches.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Owning upstream, or "portico" for management tools.
    pub server: String,
    /// Tool name as the upstream knows it.
    pub tool_name: String,
    /// The unsanitized `server.tool` name.
    pub original_name: String,
    /// Set for management tools.
    pub management: Option<ManagementTool>,
}

/// Replaces characters outside `[0-9A-Za-z_-]` with underscores.
pub fn sanitize_tool_name(name: &str) -> String {
    if name.is_empty() {
        return "tool".to_string();
    }
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() { "tool".to_string() } else { sanitized }
}

/// Builds the catalog for a session.
pub fn build_catalog(
    app: &AppState,
    allowlist: Option<&[String]>,
) -> (Vec<ToolDef>, HashMap<String, CatalogEntry>) {
    let mut tool_defs = Vec::new();
    let mut tool_index: HashMap<String, CatalogEntry> = HashMap::new();

    for session in app.supervisor().sessions() {
        let server = session.name().to_string();
        if let Some(allowlist) = allowlist {
            if !allowlist.iter().any(|s| s == &server) {
                continue;
            }
        }
        if !session.is_connected() || !app.state().is_server_enabled(&server) {
            continue;
        }
        for tool in session.tools() {
            if !app.state().is_tool_enabled(&server, &tool.name) {
                continue;
            }
            let original_name = format!("{}.{}", server, tool.name);
            let sanitized = sanitize_tool_name(&original_name);
            let mut function_name = sanitized.clone();
            let mut counter = 1;
            while tool_index.contains_key(&function_name) {
                function_name = format!("{}_{}", sanitized, counter);
                counter += 1;
            }

            tool_defs.push(ToolDef::function(ToolFunction {
                name: function_name.clone(),
                description: Some(
                    tool.description
                        .clone()
                        .unwrap_or_else(|| format!("Tool '{}' on '{}'", tool.name, server)),
                ),
                parameters: tool.input_schema.clone(),
            }));
            tool_index.insert(
                function_name,
                CatalogEntry {
                    server: server.clone(),
                    tool_name: tool.name.clone(),
                    original_name,
                    management: None,
                },
            );
        }
    }

    for management in ManagementTool::ALL {
        let function_name = management.function_name().to_string();
        if tool_index.contains_key(&function_name) {
            continue;
        }
        tool_defs.push(ToolDef::function(ToolFunction {
            name: function_name.clone(),
            description: Some(management.description().to_string()),
            parameters: management.parameters(),
        }));
        tool_index.insert(
            function_name.clone(),
            CatalogEntry {
                server: "portico".to_string(),
                tool_name: function_name.clone(),
                original_name: function_name,
                management: Some(*management),
            },
        );
    }

    info!("Tool catalog: {} tools", tool_defs.len());
    (tool_defs, tool_index)
}

/// Gateway management functions exposed in the chat catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementTool {
    /// List configured servers with connection and enable state.
    ListServers,
    /// List the tools of one server.
    ListServerTools,
    /// Enable a server.
    EnableServer,
    /// Disable a server.
    DisableServer,
    /// Enable a tool.
    EnableTool,
    /// Disable a tool.
    DisableTool,
    /// Read recent gateway logs.
    GetLogs,
    /// Read call metrics.
    GetMetrics,
}

impl ManagementTool {
    /// All management tools, in catalog order.
    pub const ALL: &'static [ManagementTool] = &[
        ManagementTool::ListServers,
        ManagementTool::ListServerTools,
        ManagementTool::EnableServer,
        ManagementTool::DisableServer,
        ManagementTool::EnableTool,
        ManagementTool::DisableTool,
        ManagementTool::GetLogs,
        ManagementTool::GetMetrics,
    ];

    /// Catalog function name.
    pub fn function_name(self) -> &'static str {
        match self {
            ManagementTool::ListServers => "portico_list_servers",
            ManagementTool::ListServerTools => "portico_list_server_tools",
            ManagementTool::EnableServer => "portico_enable_server",
            ManagementTool::DisableServer => "portico_disable_server",
            ManagementTool::EnableTool => "portico_enable_tool",
            ManagementTool::DisableTool => "portico_disable_tool",
            ManagementTool::GetLogs => "portico_get_logs",
            ManagementTool::GetMetrics => "portico_get_metrics",
        }
    }

    /// Description shown to the model.
    pub fn description(self) -> &'static str {
        match self {
            ManagementTool::ListServers => "List configured MCP servers with connection and enable state",
            ManagementTool::ListServerTools => "List the tools one MCP server exposes",
            ManagementTool::EnableServer => "Enable a configured MCP server",
            ManagementTool::DisableServer => "Disable a configured MCP server",
            ManagementTool::EnableTool => "Enable one tool on a server",
            ManagementTool::DisableTool => "Disable one tool on a server",
            ManagementTool::GetLogs => "Read recent gateway log entries",
            ManagementTool::GetMetrics => "Read gateway call metrics",
        }
    }

    /// Argument schema.
    pub fn parameters(self) -> Value {
        let server_arg = json!({
            "type": "object",
            "properties": {"server": {"type": "string", "description": "Server name"}},
            "required": ["server"],
        });
        match self {
            ManagementTool::ListServers | ManagementTool::GetMetrics => {
                json!({"type": "object", "properties": {}})
            }
            ManagementTool::ListServerTools
            | ManagementTool::EnableServer
            | ManagementTool::DisableServer => server_arg,
            ManagementTool::EnableTool | ManagementTool::DisableTool => json!({
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Server name"},
                    "tool": {"type": "string", "description": "Tool name"},
                },
                "required": ["server", "tool"],
            }),
            ManagementTool::GetLogs => json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string", "description": "Log category filter"},
                    "limit": {"type": "integer", "description": "Max entries", "default": 50},
                },
            }),
        }
    }

    /// Executes the management function against gateway state.
    pub fn execute(self, app: &AppState, args: &Value) -> Value {
        let server = args.get("server").and_then(Value::as_str).unwrap_or_default();
        let tool = args.get("tool").and_then(Value::as_str).unwrap_or_default();
        let read_only_blocked = || json!({"ok": false, "error": "Gateway is in read-only mode"});

        match self {
            ManagementTool::ListServers => {
                let servers: Vec<Value> = app
                    .supervisor()
                    .sessions()
                    .iter()
                    .map(|s| {
                        json!({
                            "name": s.name(),
                            "connected": s.is_connected(),
                            "enabled": app.state().is_server_enabled(s.name()),
                            "type": s.transport().as_str(),
                        })
                    })
                    .collect();
                json!({"ok": true, "servers": servers})
            }
            ManagementTool::ListServerTools => match app.supervisor().get(server) {
                Some(session) => {
                    let tools: Vec<Value> = session
                        .tools()
                        .iter()
                        .map(|t| {
                            json!({
                                "name": t.name,
                                "description": t.description,
                                "enabled": app.state().is_tool_enabled(server, &t.name),
                            })
                        })
                        .collect();
                    json!({"ok": true, "tools": tools})
                }
                None => json!({"ok": false, "error": format!("Server '{}' not found", server)}),
            },
            ManagementTool::EnableServer | ManagementTool::DisableServer => {
                if app.settings().read_only {
                    return read_only_blocked();
                }
                if app.supervisor().get(server).is_none() {
                    return json!({"ok": false, "error": format!("Server '{}' not found", server)});
                }
                let enabled = self == ManagementTool::EnableServer;
                app.state().set_server_enabled(server, enabled);
                json!({"ok": true, "server": server, "enabled": enabled})
            }
            ManagementTool::EnableTool | ManagementTool::DisableTool => {
                if app.settings().read_only {
                    return read_only_blocked();
                }
                let enabled = self == ManagementTool::EnableTool;
                app.state().set_tool_enabled(server, tool, enabled);
                json!({"ok": true, "server": server, "tool": tool, "enabled": enabled})
            }
            ManagementTool::GetLogs => {
                let limit =
                    args.get("limit").and_then(Value::as_u64).map_or(50, |l| l as usize);
                let category = args.get("category").and_then(Value::as_str);
                let entries = app.logbus().entries(None, category, None, Some(limit));
                json!({"ok": true, "logs": entries})
            }
            ManagementTool::GetMetrics => json!({"ok": true, "metrics": app.metrics().snapshot()}),
        }
    }
}
