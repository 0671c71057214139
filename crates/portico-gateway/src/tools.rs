//! Synthesized tool endpoints.
//!
//! One route exists per discovered tool: `POST /{upstream}/{tool}`
//! (`POST /{upstream}/` resolves when the upstream exposes exactly one
//! tool). Dispatch runs as the router fallback so the route table always
//! mirrors the supervisor's session map, even across reloads.
//!
//! Enforcement order per request: call counter, enable check,
//! protocol-version header, timeout resolution, runner execution,
//! envelope classification.

use crate::envelope::{failure_response, success};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use portico_core::mcp::{PROTOCOL_VERSION, Tool};
use portico_core::runner::RunnerError;
use portico_core::state::StateQuery;
use portico_core::supervisor::UpstreamSession;
use portico_core::{ErrorCode, GatewayError, LogLevel, LogSource};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::settings::EnforcementMode;

/// Fallback handler dispatching `POST /{upstream}/{tool}` requests.
pub async fn dispatch(State(app): State<AppState>, request: Request<Body>) -> Response {
    let structured = app.settings().structured_output;
    let respond_err = |err: GatewayError| failure_response(&err, structured);

    let path = request.uri().path().trim_matches('/').to_string();
    let mut segments = path.split('/');
    let upstream = segments.next().unwrap_or_default().to_string();
    let tool_name = segments.next().unwrap_or_default().to_string();
    if upstream.is_empty() || segments.next().is_some() {
        return respond_err(GatewayError::not_found("Not found"));
    }

    let Some(session) = app.supervisor().get(&upstream) else {
        return respond_err(GatewayError::not_found(format!("Server '{}' not found", upstream)));
    };
    if request.method() != Method::POST {
        return respond_err(GatewayError::not_found("Not found"));
    }

    // A route only exists for discovered tools; unknown tools 404 without
    // touching the counters.
    let Some(tool) = resolve_tool(&session, &tool_name) else {
        return respond_err(GatewayError::not_found(format!(
            "Tool '{}' not found on server '{}'",
            tool_name, upstream
        )));
    };

    // 1. Every inbound call counts, including ones rejected below.
    app.metrics().record_call();

    // 2. Enable check.
    if !app.state().is_server_enabled(&upstream) || !app.state().is_tool_enabled(&upstream, &tool.name)
    {
        app.metrics().record_error(ErrorCode::Disabled);
        return respond_err(GatewayError::new(ErrorCode::Disabled, "Tool disabled"));
    }

    // 3. Protocol-version header.
    let received = request
        .headers()
        .get("MCP-Protocol-Version")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    if received.as_deref() != Some(PROTOCOL_VERSION) {
        match app.settings().protocol_version_mode {
            EnforcementMode::Off => {}
            EnforcementMode::Warn => {
                let message = format!(
                    "Protocol warn: unsupported or missing MCP-Protocol-Version; supported={}; received={:?}",
                    PROTOCOL_VERSION, received
                );
                warn!("{}", message);
                app.logbus().log(LogLevel::Warning, LogSource::Openapi, message);
            }
            EnforcementMode::Enforce => {
                return respond_err(GatewayError::new(
                    ErrorCode::Protocol,
                    "Unsupported or missing MCP-Protocol-Version header",
                ));
            }
        }
    }

    // 4. Timeout resolution: query param beats header beats default.
    let timeout = match resolve_timeout(&app, &request) {
        Ok(timeout) => timeout,
        Err(err) => {
            app.metrics().record_error(ErrorCode::InvalidTimeout);
            return respond_err(err);
        }
    };

    // Body parse and schema validation.
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            app.metrics().record_error(ErrorCode::Unexpected);
            return respond_err(GatewayError::unexpected(format!("Failed to read body: {}", e)));
        }
    };
    let raw_args: Value = if body.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                app.metrics().record_error(ErrorCode::Unexpected);
                return respond_err(GatewayError::new(ErrorCode::InvalidJson, e.to_string()));
            }
        }
    };

    let schema = app.compiled_schema(&upstream, &tool.name, &tool.input_schema);
    let args = match schema.validate(&raw_args) {
        Ok(args) => args,
        Err(errors) => {
            app.metrics().record_error(ErrorCode::Unexpected);
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return respond_err(
                GatewayError::new(ErrorCode::Invalid, "Request failed validation")
                    .with_data(serde_json::json!({"errors": messages})),
            );
        }
    };

    // 5. Runner execution.
    let endpoint_name = format!("{}/{}", upstream, tool.name);
    info!("Calling endpoint: {}, with args: {}", endpoint_name, args);
    app.logbus().log_categorized(
        LogLevel::Info,
        LogSource::Openapi,
        "tools",
        format!("Calling endpoint: {}", endpoint_name),
    );
    let max_timeout = app.settings().tool_timeout_max.map(Duration::from_secs_f64);
    let result = app
        .runner()
        .execute(&session, &tool.name, &endpoint_name, args, timeout, max_timeout)
        .await;

    // 6. Envelope classification.
    match result {
        Ok(value) => {
            if let Some(response) = validate_output(&app, &upstream, &tool, &value) {
                return response;
            }
            (StatusCode::OK, Json(success(value, structured))).into_response()
        }
        Err(err) => {
            let code = match &err {
                RunnerError::Timeout => ErrorCode::Timeout,
                RunnerError::InvalidTimeout { .. } => ErrorCode::InvalidTimeout,
                _ => ErrorCode::Unexpected,
            };
            app.metrics().record_error(code);
            app.logbus().log(
                LogLevel::Error,
                LogSource::Openapi,
                format!("Tool call failed: {}: {}", endpoint_name, err),
            );
            respond_err(err.into())
        }
    }
}

/// Finds the tool the path names; a bare `/{upstream}/` resolves when the
/// upstream has exactly one tool.
fn resolve_tool(session: &Arc<UpstreamSession>, tool_name: &str) -> Option<Tool> {
    if tool_name.is_empty() {
        let tools = session.tools();
        if tools.len() == 1 {
            return tools.into_iter().next();
        }
        return None;
    }
    session.find_tool(tool_name)
}

fn resolve_timeout(
    app: &AppState,
    request: &Request<Body>,
) -> Result<Option<Duration>, GatewayError> {
    let invalid = |max: Option<f64>| {
        let mut err = GatewayError::new(ErrorCode::InvalidTimeout, "Invalid timeout");
        if let Some(max) = max {
            err = GatewayError::new(ErrorCode::InvalidTimeout, "Timeout out of allowed range")
                .with_data(serde_json::json!({"max": max}));
        }
        err
    };

    let from_query = request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| pair.strip_prefix("timeout=").map(String::from))
    });
    let from_header = request
        .headers()
        .get("X-Tool-Timeout")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let raw = from_query.or(from_header);
    let max = app.settings().tool_timeout_max;
    let seconds = match raw {
        Some(raw) => match raw.parse::<f64>() {
            Ok(seconds) => Some(seconds),
            Err(_) => return Err(invalid(None)),
        },
        None => app.settings().tool_timeout,
    };

    if let Some(seconds) = seconds {
        if seconds <= 0.0 || max.is_some_and(|max| seconds > max) {
            return Err(invalid(max));
        }
    }
    Ok(seconds.map(Duration::from_secs_f64))
}

fn validate_output(
    app: &AppState,
    upstream: &str,
    tool: &Tool,
    value: &Value,
) -> Option<Response> {
    let mode = app.settings().validate_output_mode;
    if mode == EnforcementMode::Off {
        return None;
    }
    let output_schema = tool.output_schema.as_ref()?;
    let compiled = portico_core::schema::CompiledSchema::compile(output_schema);
    let errors = match compiled.validate(value) {
        Ok(_) => return None,
        Err(errors) => errors,
    };
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    match mode {
        EnforcementMode::Enforce => {
            app.metrics().record_error(ErrorCode::Unexpected);
            let err = GatewayError::new(
                ErrorCode::OutputValidation,
                format!("Output validation failed for '{}/{}'", upstream, tool.name),
            )
            .with_data(serde_json::json!({"errors": messages}));
            Some(failure_response(&err, app.settings().structured_output))
        }
        _ => {
            warn!("Output validation warning for {}/{}: {:?}", upstream, tool.name, messages);
            None
        }
    }
}
