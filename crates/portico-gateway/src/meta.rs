//! Admin meta surface: server/tool toggles, config editing, reload,
//! logs, metrics, and status.

use crate::envelope::failure_response;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use portico_core::config::GatewayConfig;
use portico_core::state::StateQuery;
use portico_core::{ErrorCode, GatewayError, LogLevel, LogSource};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

fn fail(app: &AppState, err: GatewayError) -> Response {
    failure_response(&err, app.settings().structured_output)
}

fn guard_read_only(app: &AppState) -> Result<(), GatewayError> {
    if app.settings().read_only { Err(GatewayError::read_only()) } else { Ok(()) }
}

/// `GET /_meta/servers`
pub async fn list_servers(State(app): State<AppState>) -> Json<Value> {
    let servers: Vec<Value> = app
        .supervisor()
        .sessions()
        .iter()
        .map(|session| {
            let name = session.name();
            let state = app.state().server_state(name);
            json!({
                "name": name,
                "enabled": state.enabled,
                "connected": session.is_connected(),
                "type": session.transport().as_str(),
                "tools": state.tools,
                "lastError": session.last_error(),
            })
        })
        .collect();
    Json(json!({"ok": true, "servers": servers}))
}

/// `GET /_meta/servers/{name}/tools`
pub async fn list_server_tools(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let Some(session) = app.supervisor().get(&name) else {
        return fail(&app, GatewayError::not_found(format!("Server '{}' not found", name)));
    };
    let tools: Vec<Value> = session
        .tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "enabled": app.state().is_tool_enabled(&name, &tool.name),
                "server": name,
            })
        })
        .collect();
    Json(json!({"ok": true, "server": name, "tools": tools})).into_response()
}

fn set_server_enabled(app: &AppState, name: &str, enabled: bool) -> Response {
    if let Err(err) = guard_read_only(app) {
        return fail(app, err);
    }
    if app.supervisor().get(name).is_none() {
        return fail(app, GatewayError::not_found(format!("Server '{}' not found", name)));
    }
    app.state().set_server_enabled(name, enabled);
    info!("Server '{}' {}", name, if enabled { "enabled" } else { "disabled" });
    Json(json!({"ok": true, "server": name, "enabled": enabled})).into_response()
}

/// `POST /_meta/servers/{name}/enable`
pub async fn enable_server(State(app): State<AppState>, Path(name): Path<String>) -> Response {
    set_server_enabled(&app, &name, true)
}

/// `POST /_meta/servers/{name}/disable`
pub async fn disable_server(State(app): State<AppState>, Path(name): Path<String>) -> Response {
    set_server_enabled(&app, &name, false)
}

fn set_tool_enabled(app: &AppState, server: &str, tool: &str, enabled: bool) -> Response {
    if let Err(err) = guard_read_only(app) {
        return fail(app, err);
    }
    if app.supervisor().get(server).is_none() {
        return fail(app, GatewayError::not_found(format!("Server '{}' not found", server)));
    }
    app.state().set_tool_enabled(server, tool, enabled);
    info!("Tool '{}/{}' {}", server, tool, if enabled { "enabled" } else { "disabled" });
    Json(json!({"ok": true, "server": server, "tool": tool, "enabled": enabled})).into_response()
}

/// `POST /_meta/servers/{name}/tools/{tool}/enable`
pub async fn enable_tool(
    State(app): State<AppState>,
    Path((server, tool)): Path<(String, String)>,
) -> Response {
    set_tool_enabled(&app, &server, &tool, true)
}

/// `POST /_meta/servers/{name}/tools/{tool}/disable`
pub async fn disable_tool(
    State(app): State<AppState>,
    Path((server, tool)): Path<(String, String)>,
) -> Response {
    set_tool_enabled(&app, &server, &tool, false)
}

/// `GET /_meta/config`
pub async fn config_info(State(app): State<AppState>) -> Json<Value> {
    let config = app.supervisor().config();
    Json(json!({
        "ok": true,
        "path": app.settings().config_path.as_ref().map(|p| p.display().to_string()),
        "servers": config.mcp_servers.keys().cloned().collect::<Vec<_>>(),
        "readOnly": app.settings().read_only,
    }))
}

/// `GET /_meta/config/content`
pub async fn config_content(State(app): State<AppState>) -> Response {
    let Some(path) = app.settings().config_path.clone() else {
        return fail(&app, GatewayError::new(ErrorCode::NoConfig, "No config file loaded"));
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => Json(json!({
            "ok": true,
            "path": path.display().to_string(),
            "content": content,
        }))
        .into_response(),
        Err(e) => fail(&app, GatewayError::new(ErrorCode::IoError, e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveConfigRequest {
    /// New config file text, validated before writing.
    pub content: String,
}

/// `POST /_meta/config/save`
pub async fn save_config(
    State(app): State<AppState>,
    Json(payload): Json<SaveConfigRequest>,
) -> Response {
    if let Err(err) = guard_read_only(&app) {
        return fail(&app, err);
    }
    let Some(path) = app.settings().config_path.clone() else {
        return fail(&app, GatewayError::new(ErrorCode::NoConfig, "No config file loaded"));
    };

    let parsed: Value = match serde_json::from_str(&payload.content) {
        Ok(parsed) => parsed,
        Err(e) => return fail(&app, GatewayError::new(ErrorCode::InvalidJson, e.to_string())),
    };
    if !parsed.get("mcpServers").is_some_and(Value::is_object) {
        return fail(
            &app,
            GatewayError::new(ErrorCode::Invalid, "Config must contain an 'mcpServers' object"),
        );
    }
    let new_config = match GatewayConfig::from_json(&payload.content) {
        Ok(config) => config,
        Err(err) => return fail(&app, err),
    };

    if let Err(e) = std::fs::write(&path, &payload.content) {
        return fail(&app, GatewayError::new(ErrorCode::IoError, e.to_string()));
    }
    app.logbus().log(
        LogLevel::Info,
        LogSource::Openapi,
        format!("Config saved to {}", path.display()),
    );

    match app.supervisor().reload(new_config).await {
        Ok(outcome) => Json(json!({"ok": true, "saved": true, "reload": outcome})).into_response(),
        Err(err) => fail(&app, err),
    }
}

/// `POST /_meta/reload`
pub async fn reload_config(State(app): State<AppState>) -> Response {
    if let Err(err) = guard_read_only(&app) {
        return fail(&app, err);
    }
    let Some(path) = app.settings().config_path.clone() else {
        return fail(&app, GatewayError::new(ErrorCode::NoConfig, "No config file loaded"));
    };
    let new_config = match GatewayConfig::load(&path) {
        Ok(config) => config,
        Err(err) => return fail(&app, err),
    };
    match app.supervisor().reload(new_config).await {
        Ok(outcome) => {
            app.logbus().log(
                LogLevel::Info,
                LogSource::Openapi,
                format!("Reload complete (generation {})", outcome.generation),
            );
            Json(json!({"ok": true, "reload": outcome})).into_response()
        }
        Err(err) => {
            app.logbus().log(LogLevel::Error, LogSource::Openapi, err.to_string());
            fail(&app, err)
        }
    }
}

/// `POST /_meta/reinit/{name}`
pub async fn reinit_server(State(app): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(err) = guard_read_only(&app) {
        return fail(&app, err);
    }
    match app.supervisor().reinit(&name).await {
        Ok(()) => Json(json!({"ok": true, "server": name, "reinitialized": true})).into_response(),
        Err(err) => fail(&app, err),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    /// Filter by source ("openapi" or "mcp").
    pub source: Option<String>,
    /// Filter by category.
    pub category: Option<String>,
    /// Sequence floor; only newer entries return.
    pub cursor: Option<u64>,
    /// Keep at most this many of the newest entries.
    pub limit: Option<usize>,
}

fn parse_source(raw: Option<&str>) -> Result<Option<LogSource>, GatewayError> {
    match raw {
        None => Ok(None),
        Some("openapi") => Ok(Some(LogSource::Openapi)),
        Some("mcp") => Ok(Some(LogSource::Mcp)),
        Some(other) => {
            Err(GatewayError::new(ErrorCode::Invalid, format!("Unknown log source '{}'", other)))
        }
    }
}

/// `GET /_meta/logs`
pub async fn get_logs(State(app): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let source = match parse_source(query.source.as_deref()) {
        Ok(source) => source,
        Err(err) => return fail(&app, err),
    };
    let entries =
        app.logbus().entries(source, query.category.as_deref(), query.cursor, query.limit);
    Json(json!({
        "ok": true,
        "logs": entries,
        "latestSequence": app.logbus().latest_sequence(),
    }))
    .into_response()
}

/// `GET /_meta/logs/sources`
pub async fn get_log_sources(State(app): State<AppState>) -> Json<Value> {
    Json(json!({"ok": true, "sources": app.logbus().sources()}))
}

/// `GET /_meta/logs/categorized`
pub async fn get_logs_categorized(
    State(app): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let source = match parse_source(query.source.as_deref()) {
        Ok(source) => source,
        Err(err) => return fail(&app, err),
    };
    Json(json!({"ok": true, "categories": app.logbus().entries_categorized(source)}))
        .into_response()
}

/// `POST /_meta/logs/clear/{category}` (the literal category `all` clears
/// everything)
pub async fn clear_logs(State(app): State<AppState>, Path(category): Path<String>) -> Response {
    if let Err(err) = guard_read_only(&app) {
        return fail(&app, err);
    }
    if category == "all" {
        app.logbus().clear(None);
    } else {
        app.logbus().clear(Some(&category));
    }
    Json(json!({"ok": true, "cleared": category})).into_response()
}

/// `GET /_meta/metrics`
pub async fn get_metrics(State(app): State<AppState>) -> Json<Value> {
    Json(json!({"ok": true, "metrics": app.metrics().snapshot()}))
}

/// `GET /_meta/status`
pub async fn get_status(State(app): State<AppState>) -> Json<Value> {
    let sessions = app.supervisor().sessions();
    let connected = sessions.iter().filter(|s| s.is_connected()).count();
    Json(json!({
        "ok": true,
        "status": "running",
        "uptimeSecs": app.uptime_secs(),
        "generation": app.supervisor().generation(),
        "lastReload": app.supervisor().last_reload(),
        "servers": {"total": sessions.len(), "connected": connected},
        "readOnly": app.settings().read_only,
    }))
}

/// `GET /_meta/stats`
pub async fn get_stats(State(app): State<AppState>) -> Json<Value> {
    let per_tool = app.metrics().per_tool();
    let servers: Vec<Value> = app
        .supervisor()
        .sessions()
        .iter()
        .map(|session| {
            let name = session.name();
            let tools = session.tools();
            let prefix = format!("{}/", name);
            let calls: u64 = per_tool
                .iter()
                .filter(|(endpoint, _)| endpoint.starts_with(&prefix))
                .map(|(_, m)| m.calls)
                .sum();
            let errors: u64 = per_tool
                .iter()
                .filter(|(endpoint, _)| endpoint.starts_with(&prefix))
                .map(|(_, m)| m.errors)
                .sum();
            json!({
                "name": name,
                "connected": session.is_connected(),
                "toolCount": tools.len(),
                "calls": calls,
                "errors": errors,
            })
        })
        .collect();
    Json(json!({"ok": true, "servers": servers}))
}
