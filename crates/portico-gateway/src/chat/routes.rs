//! HTTP handlers for the chat session surface.

use crate::chat::catalog::build_catalog;
use crate::chat::exchange::{
    Emitter, ExchangeError, MessagePayload, perform_exchange, resolve_provider,
};
use crate::chat::models::load_model_catalog;
use crate::envelope::failure_response;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use portico_core::{GatewayError, LogLevel, LogSource};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Model to serve the session.
    pub model: String,
    /// Optional system prompt seeded into history.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Optional upstream allowlist restricting the tool catalog.
    #[serde(default)]
    pub servers: Option<Vec<String>>,
}

/// `POST /sessions`
pub async fn create_session(
    State(app): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Json<Value> {
    let (id, handle) =
        app.sessions().create(payload.model, payload.system_prompt, payload.servers);
    {
        let mut session = handle.lock().await;
        let (defs, index) = build_catalog(&app, session.allowlist.as_deref());
        session.tool_defs = defs;
        session.tool_index = index;
    }
    let session = handle.lock().await;
    info!("Chat session {} created (model {})", id, session.model);
    app.logbus().log(
        LogLevel::Info,
        LogSource::Openapi,
        format!("Chat session {} created", id),
    );
    Json(json!({"ok": true, "session": session.to_json()}))
}

/// `GET /sessions/{id}`
pub async fn get_session(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    match app.sessions().get(&id) {
        Some(handle) => {
            let session = handle.lock().await;
            Json(json!({"ok": true, "session": session.to_json()})).into_response()
        }
        None => failure_response(
            &GatewayError::not_found(format!("Session '{}' not found", id)),
            false,
        ),
    }
}

/// `DELETE /sessions/{id}`
pub async fn delete_session(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    if app.sessions().delete(&id) {
        Json(json!({"ok": true, "deleted": id})).into_response()
    } else {
        failure_response(&GatewayError::not_found(format!("Session '{}' not found", id)), false)
    }
}

/// `POST /sessions/{id}/reset`
pub async fn reset_session(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    match app.sessions().get(&id) {
        Some(handle) => {
            let mut session = handle.lock().await;
            session.reset();
            Json(json!({"ok": true, "session": session.to_json()})).into_response()
        }
        None => failure_response(
            &GatewayError::not_found(format!("Session '{}' not found", id)),
            false,
        ),
    }
}

/// `GET /sessions/models`
pub async fn list_models(State(app): State<AppState>) -> Json<Value> {
    let models = load_model_catalog(&app).await;
    let favorites = app.state().favorite_models();
    Json(json!({"ok": true, "models": models, "favorites": favorites}))
}

/// Body of `POST /sessions/favorites`.
#[derive(Debug, Deserialize)]
pub struct FavoritesRequest {
    /// Full replacement favorites list.
    pub model_ids: Vec<String>,
}

/// `GET /sessions/favorites`
pub async fn get_favorites(State(app): State<AppState>) -> Json<Value> {
    Json(json!({"ok": true, "favorites": app.state().favorite_models()}))
}

/// `POST /sessions/favorites`
pub async fn set_favorites(
    State(app): State<AppState>,
    Json(payload): Json<FavoritesRequest>,
) -> Json<Value> {
    app.state().set_favorite_models(payload.model_ids);
    Json(json!({"ok": true, "favorites": app.state().favorite_models()}))
}

/// `POST /sessions/{id}/messages`
pub async fn post_message(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<MessagePayload>,
) -> Response {
    let Some(handle) = app.sessions().get(&id) else {
        return failure_response(
            &GatewayError::not_found(format!("Session '{}' not found", id)),
            false,
        );
    };

    if payload.stream {
        return stream_message(app, handle, payload).into_response();
    }

    let mut session = handle.lock().await;
    let provider = match resolve_provider(&mut session, &payload) {
        Ok(provider) => provider,
        Err(e) => return failure_response(&GatewayError::unexpected(e.to_string()), false),
    };
    match perform_exchange(&app, &mut session, provider.as_ref(), &payload, None).await {
        Ok(message) => Json(json!({
            "ok": true,
            "session": session.to_json(),
            "message": message,
        }))
        .into_response(),
        Err(e) => failure_response(&GatewayError::unexpected(e.to_string()), false),
    }
}

/// Runs the exchange in a worker task while the response body drains a
/// bounded event channel. Dropping the body (client disconnect) closes the
/// channel and the worker aborts at its next emit.
fn stream_message(
    app: AppState,
    handle: std::sync::Arc<tokio::sync::Mutex<crate::chat::sessions::ChatSession>>,
    payload: MessagePayload,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Value>(64);

    tokio::spawn(async move {
        let emitter = Emitter::new(tx.clone());
        let mut session = handle.lock().await;
        let provider = match resolve_provider(&mut session, &payload) {
            Ok(provider) => provider,
            Err(e) => {
                let _ = tx.send(json!({"type": "error", "message": e.to_string()})).await;
                let _ = tx.send(json!({"type": "done"})).await;
                return;
            }
        };
        let result =
            perform_exchange(&app, &mut session, provider.as_ref(), &payload, Some(&emitter)).await;
        match result {
            Ok(_) => {}
            Err(ExchangeError::Cancelled) => {
                info!("Chat stream cancelled by client disconnect");
            }
            Err(e) => {
                app.logbus().log(
                    LogLevel::Error,
                    LogSource::Openapi,
                    format!("Chat exchange failed: {}", e),
                );
                let _ = tx.send(json!({"type": "error", "message": e.to_string()})).await;
            }
        }
        let _ = tx.send(json!({"type": "done"})).await;
    });

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok(Event::default().data(event.to_string())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RuntimeSettings;
    use crate::state::test_support::app_state;
    use axum::http::StatusCode;

    async fn body_of(response: Response) -> Value {
        let bytes =
            axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_delete_session() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let Json(created) = create_session(
            State(app.clone()),
            Json(CreateSessionRequest {
                model: "gpt-4o".to_string(),
                system_prompt: Some("be brief".to_string()),
                servers: None,
            }),
        )
        .await;
        let id = created["session"]["id"].as_str().unwrap().to_string();
        // The catalog is built at creation; management tools are present.
        assert!(created["session"]["toolCount"].as_u64().unwrap() > 0);

        let response = get_session(State(app.clone()), Path(id.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_of(response).await;
        assert_eq!(body["session"]["messages"][0]["role"], "system");

        let response = delete_session(State(app.clone()), Path(id.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = get_session(State(app), Path(id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_preserves_system_prompt() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let Json(created) = create_session(
            State(app.clone()),
            Json(CreateSessionRequest {
                model: "gpt-4o".to_string(),
                system_prompt: Some("be brief".to_string()),
                servers: None,
            }),
        )
        .await;
        let id = created["session"]["id"].as_str().unwrap().to_string();

        let handle = app.sessions().get(&id).unwrap();
        handle.lock().await.messages.push(portico_abstraction::ChatMessage::user("hi"));

        let response = reset_session(State(app), Path(id)).await;
        let body = body_of(response).await;
        let messages = body["session"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "system");
    }

    #[tokio::test]
    async fn test_message_to_unknown_session_is_not_found() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let payload: MessagePayload =
            serde_json::from_value(json!({"message": "hi"})).unwrap();
        let response = post_message(State(app), Path("ghost".to_string()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_favorites_round_trip() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let Json(body) = set_favorites(
            State(app.clone()),
            Json(FavoritesRequest { model_ids: vec!["openai/gpt-4o".to_string()] }),
        )
        .await;
        assert_eq!(body["favorites"][0], "openai/gpt-4o");
        let Json(body) = get_favorites(State(app)).await;
        assert_eq!(body["favorites"][0], "openai/gpt-4o");
    }

    #[tokio::test]
    async fn test_message_payload_defaults() {
        let payload: MessagePayload =
            serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert!(!payload.stream);
        assert!(payload.include_reasoning);
        assert!(payload.model.is_none());
    }
}
