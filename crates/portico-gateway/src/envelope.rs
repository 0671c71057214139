//! The uniform response envelope.
//!
//! Success: `{ ok: true, result, output? }`. Failure:
//! `{ ok: false, error: { message, code?, data?, timestamp }, output? }`.
//! With structured output enabled, successes classify their items and
//! failures carry an empty collection.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use portico_core::GatewayError;
use serde_json::{Value, json};

/// Classifies one result value for structured output mode.
fn classify(value: &Value) -> Value {
    match value {
        Value::String(_) => json!({"type": "text", "value": value}),
        Value::Null | Value::Bool(_) | Value::Number(_) => {
            json!({"type": "scalar", "value": value})
        }
        Value::Array(_) => json!({"type": "collection", "value": value}),
        Value::Object(_) => json!({"type": "object", "value": value}),
    }
}

/// Builds a success envelope.
pub fn success(result: Value, structured_output: bool) -> Value {
    if structured_output {
        let items: Vec<Value> = match &result {
            Value::Array(items) => items.iter().map(classify).collect(),
            single => vec![classify(single)],
        };
        json!({"ok": true, "result": result, "output": {"type": "collection", "items": items}})
    } else {
        json!({"ok": true, "result": result})
    }
}

/// Builds a failure envelope body.
pub fn failure_body(err: &GatewayError, structured_output: bool) -> Value {
    let mut error = json!({
        "message": err.message,
        "code": err.code.as_str(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    if let Some(ref data) = err.data {
        error["data"] = data.clone();
    }
    let mut body = json!({"ok": false, "error": error});
    if structured_output {
        body["output"] = json!({"type": "collection", "items": []});
    }
    body
}

/// Renders a gateway error as its HTTP response.
pub fn failure_response(err: &GatewayError, structured_output: bool) -> Response {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(failure_body(err, structured_output))).into_response()
}
