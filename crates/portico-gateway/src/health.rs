//! Health and connectivity reporting.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

/// `GET /healthz`: connection flags per upstream plus reload bookkeeping.
pub async fn healthz(State(app): State<AppState>) -> Json<Value> {
    let servers: serde_json::Map<String, Value> = app
        .supervisor()
        .sessions()
        .iter()
        .map(|session| {
            (
                session.name().to_string(),
                json!({
                    "connected": session.is_connected(),
                    "type": session.transport().as_str(),
                }),
            )
        })
        .collect();

    Json(json!({
        "status": "ok",
        "generation": app.supervisor().generation(),
        "lastReload": app.supervisor().last_reload(),
        "servers": servers,
    }))
}
