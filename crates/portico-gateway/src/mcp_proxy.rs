//! The raw-MCP proxy listener.
//!
//! A second port exposes JSON-RPC directly: one aggregate endpoint that
//! fans `tools/list` out across every upstream (tool names prefixed
//! `server__tool`) and routes `tools/call` by prefix, plus one endpoint
//! per upstream that forwards verbatim. Every endpoint is wrapped by the
//! proxy filter: disabled tools disappear from listings and calls to them
//! are answered with a JSON-RPC 403 without reaching the upstream.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use portico_core::mcp::PROTOCOL_VERSION;
use portico_core::proxy::{check_tools_call, filter_payload, resolve_server_for_tool};
use portico_core::state::StateQuery;
use portico_core::{LogLevel, LogSource};
use serde_json::{Value, json};
use tracing::debug;

/// Builds the proxy router. `base_path` defaults to `/mcp` in the CLI.
pub fn router(app: AppState, base_path: &str) -> Router {
    let base = if base_path.is_empty() { "/mcp" } else { base_path };
    Router::new()
        .route(base, post(aggregate_endpoint))
        .route(&format!("{}/:server", base), post(server_endpoint))
        .with_state(app)
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn request_id(message: &Value) -> Value {
    message.get("id").cloned().unwrap_or(Value::Null)
}

/// `POST {base}/{server}`: forward JSON-RPC to one upstream, filtered.
pub async fn server_endpoint(
    State(app): State<AppState>,
    Path(server): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    match payload {
        Value::Array(batch) => {
            let mut responses = Vec::with_capacity(batch.len());
            for message in batch {
                if let Some(response) = process_server_message(&app, &server, message).await {
                    responses.push(response);
                }
            }
            Json(Value::Array(responses)).into_response()
        }
        message => match process_server_message(&app, &server, message).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
    }
}

async fn process_server_message(
    app: &AppState,
    server: &str,
    message: Value,
) -> Option<Value> {
    let id = request_id(&message);
    // Notifications get no response.
    if message.get("id").is_none() && message.get("method").is_some() {
        debug!("Dropping notification on proxy: {:?}", message.get("method"));
        return None;
    }

    if let Some(blocked) = check_tools_call(&message, Some(server), app.state()) {
        app.logbus().log_categorized(
            LogLevel::Warning,
            LogSource::Mcp,
            "tools",
            format!("Blocked tools/call on '{}'", server),
        );
        return Some(blocked);
    }

    let Some(session) = app.supervisor().get(server) else {
        return Some(rpc_error(id, -32001, &format!("Server '{}' not found", server)));
    };
    match session.forward_raw(message).await {
        Ok(mut response) => {
            filter_payload(&mut response, Some(server), app.state());
            Some(response)
        }
        Err(e) => {
            app.logbus().log(
                LogLevel::Error,
                LogSource::Mcp,
                format!("Proxy forward to '{}' failed: {}", server, e),
            );
            Some(rpc_error(id, -32603, &e.to_string()))
        }
    }
}

/// `POST {base}`: the aggregate endpoint covering every upstream.
pub async fn aggregate_endpoint(
    State(app): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    match payload {
        Value::Array(batch) => {
            let mut responses = Vec::with_capacity(batch.len());
            for message in batch {
                if let Some(response) = process_aggregate_message(&app, message).await {
                    responses.push(response);
                }
            }
            Json(Value::Array(responses)).into_response()
        }
        message => match process_aggregate_message(&app, message).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
    }
}

async fn process_aggregate_message(app: &AppState, message: Value) -> Option<Value> {
    let id = request_id(&message);
    let method = message.get("method").and_then(Value::as_str).unwrap_or_default();

    if message.get("id").is_none() && !method.is_empty() {
        return None;
    }

    match method {
        "initialize" => Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "portico", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}},
            },
        })),
        "tools/list" => Some(aggregate_tools_list(app, id)),
        "tools/call" => Some(aggregate_tools_call(app, message, id).await),
        "ping" => Some(json!({"jsonrpc": "2.0", "id": id, "result": {}})),
        _ => Some(rpc_error(id, -32601, &format!("Method not found: {}", method))),
    }
}

fn aggregate_tools_list(app: &AppState, id: Value) -> Value {
    let mut tools: Vec<Value> = Vec::new();
    for session in app.supervisor().sessions() {
        let server = session.name();
        if !session.is_connected() || !app.state().is_server_enabled(server) {
            continue;
        }
        for tool in session.tools() {
            let mut wire = serde_json::to_value(&tool).unwrap_or_else(|_| json!({}));
            wire["name"] = json!(format!("{}__{}", server, tool.name));
            wire["annotations"] = json!({"server": server});
            tools.push(wire);
        }
    }
    let mut response = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}});
    // The state scan also removes tools disabled under their bare names.
    filter_payload(&mut response, None, app.state());
    response
}

async fn aggregate_tools_call(app: &AppState, message: Value, id: Value) -> Value {
    if let Some(blocked) = check_tools_call(&message, None, app.state()) {
        app.logbus().log_categorized(
            LogLevel::Warning,
            LogSource::Mcp,
            "tools",
            "Blocked tools/call on aggregate proxy",
        );
        return blocked;
    }

    let tool_name = message
        .pointer("/params/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(resolved) = resolve_server_for_tool(&tool_name, None, app.state()) else {
        return rpc_error(id, -32602, &format!("Cannot resolve server for tool '{}'", tool_name));
    };
    let Some(session) = app.supervisor().get(&resolved.server) else {
        return rpc_error(id, -32001, &format!("Server '{}' not found", resolved.server));
    };

    let mut forwarded = message;
    forwarded["params"]["name"] = json!(resolved.bare_name);
    match session.forward_raw(forwarded).await {
        Ok(response) => response,
        Err(e) => rpc_error(id, -32603, &e.to_string()),
    }
}
