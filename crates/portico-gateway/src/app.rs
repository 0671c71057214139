//! Router assembly for both listeners.

use crate::state::AppState;
use crate::{auth, chat, health, mcp_proxy, meta, openapi, tools};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Builds the main-port router: synthesized tool endpoints (as the
/// fallback), the meta surface, chat sessions, and health.
pub fn build_main_router(app: AppState) -> Router {
    let meta_routes = Router::new()
        .route("/servers", get(meta::list_servers))
        .route("/servers/:name/tools", get(meta::list_server_tools))
        .route("/servers/:name/enable", post(meta::enable_server))
        .route("/servers/:name/disable", post(meta::disable_server))
        .route("/servers/:name/tools/:tool/enable", post(meta::enable_tool))
        .route("/servers/:name/tools/:tool/disable", post(meta::disable_tool))
        .route("/config", get(meta::config_info))
        .route("/config/content", get(meta::config_content))
        .route("/config/save", post(meta::save_config))
        .route("/reload", post(meta::reload_config))
        .route("/reinit/:name", post(meta::reinit_server))
        .route("/logs", get(meta::get_logs))
        .route("/logs/sources", get(meta::get_log_sources))
        .route("/logs/categorized", get(meta::get_logs_categorized))
        .route("/logs/clear/:category", post(meta::clear_logs))
        .route("/metrics", get(meta::get_metrics))
        .route("/status", get(meta::get_status))
        .route("/stats", get(meta::get_stats))
        .route("/aggregate_openapi", get(openapi::aggregate_openapi));

    let session_routes = Router::new()
        .route("/", post(chat::routes::create_session))
        .route("/models", get(chat::routes::list_models))
        .route(
            "/favorites",
            get(chat::routes::get_favorites).post(chat::routes::set_favorites),
        )
        .route(
            "/:id",
            get(chat::routes::get_session).delete(chat::routes::delete_session),
        )
        .route("/:id/reset", post(chat::routes::reset_session))
        .route("/:id/messages", post(chat::routes::post_message));

    Router::new()
        .route("/healthz", get(health::healthz))
        .nest("/_meta", meta_routes)
        .nest("/sessions", session_routes)
        .fallback(tools::dispatch)
        .layer(axum::middleware::from_fn_with_state(app.clone(), auth::require_api_key))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Builds the raw-MCP-port router.
pub fn build_proxy_router(app: AppState, base_path: &str) -> Router {
    mcp_proxy::router(app, base_path).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RuntimeSettings;
    use crate::state::test_support::app_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz_routes() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let router = build_main_router(app);
        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_meta_and_sessions_are_mounted() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let router = build_main_router(app);
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/_meta/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router
            .oneshot(Request::builder().uri("/sessions/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_falls_back_to_tool_dispatch() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let router = build_main_router(app);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ghost/tool")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_proxy_router_mounts_base_path() {
        let (app, _dir) = app_state(RuntimeSettings::default());
        let router = build_proxy_router(app, "/mcp");
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
