//! Bearer-key guard for the main surface.
//!
//! When an API key is configured, every route except `/healthz` requires
//! `Authorization: Bearer <key>`.

use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Axum middleware enforcing the shared bearer key.
pub async fn require_api_key(
    State(app): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = app.settings().api_key.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path() == "/healthz" {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": {"message": "Invalid or missing API key"}})),
        )
            .into_response()
    }
}
