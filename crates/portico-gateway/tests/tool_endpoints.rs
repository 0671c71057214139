//! End-to-end tests of the synthesized tool surface against a scripted
//! stdio MCP upstream.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::app_with_fixture;
use portico_gateway::{EnforcementMode, RuntimeSettings, build_main_router};
use serde_json::Value;
use tower::ServiceExt;

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("MCP-Protocol-Version", "2025-06-18")
        .body(Body::from("{}"))
        .unwrap()
}

async fn body_of(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app);

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .header("MCP-Protocol-Version", "2025-06-18")
        .body(Body::from(r#"{"text":"hello"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_of(response).await;
    assert_eq!(body["ok"], true);
    // JSON text content is unquoted to a structured value.
    assert_eq!(body["result"]["echoed"], true);
}

#[tokio::test]
async fn test_slow_tool_times_out_with_504() {
    let settings = RuntimeSettings {
        tool_timeout: Some(0.05),
        tool_timeout_max: Some(5.0),
        ..Default::default()
    };
    let (app, _dir) = app_with_fixture(settings).await;
    let router = build_main_router(app.clone());

    let response = router.oneshot(post("/fix/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_of(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "timeout");
    assert_eq!(body["error"]["message"], "Tool timed out");
    assert_eq!(app.metrics().snapshot()["errors"]["byCode"]["timeout"], 1);
}

#[tokio::test]
async fn test_non_numeric_timeout_is_400() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app.clone());

    let response = router.oneshot(post("/fix/slow?timeout=abc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "invalid_timeout");
    assert_eq!(app.metrics().snapshot()["errors"]["byCode"]["invalid_timeout"], 1);
}

#[tokio::test]
async fn test_timeout_above_max_reports_max() {
    let settings = RuntimeSettings { tool_timeout_max: Some(1.0), ..Default::default() };
    let (app, _dir) = app_with_fixture(settings).await;
    let router = build_main_router(app);

    let response = router.oneshot(post("/fix/slow?timeout=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "invalid_timeout");
    assert_eq!(body["error"]["data"]["max"], 1.0);
}

#[tokio::test]
async fn test_disabled_tool_is_403_and_counted_once() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    app.state().set_tool_enabled("fix", "echo", false);
    let router = build_main_router(app.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "disabled");

    let snapshot = app.metrics().snapshot();
    assert_eq!(snapshot["errors"]["byCode"]["disabled"], 1);
    // The runner never executed, so no per-tool metric moved.
    assert!(snapshot["perTool"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_server_blocks_every_tool() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    app.state().set_server_enabled("fix", false);
    let router = build_main_router(app);

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_protocol_enforce_mode() {
    let settings = RuntimeSettings {
        protocol_version_mode: EnforcementMode::Enforce,
        ..Default::default()
    };
    let (app, _dir) = app_with_fixture(settings).await;
    let router = build_main_router(app);

    // Without the header: 426 protocol.
    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "protocol");

    // With the header the same call succeeds.
    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .header("MCP-Protocol-Version", "2025-06-18")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protocol_warn_mode_logs_and_succeeds() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let warned = app
        .logbus()
        .entries(None, None, None, None)
        .iter()
        .any(|e| e.message.contains("Protocol warn"));
    assert!(warned);
}

#[tokio::test]
async fn test_validation_failure_is_400_invalid() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app);

    // `echo` requires a string `text`.
    let response = router.oneshot(post("/fix/echo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "invalid");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_json() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app);

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_of(response).await;
    assert_eq!(body["error"]["code"], "invalid_json");
}

#[tokio::test]
async fn test_structured_output_envelope() {
    let settings = RuntimeSettings { structured_output: true, ..Default::default() };
    let (app, _dir) = app_with_fixture(settings).await;
    let router = build_main_router(app);

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"hello"}"#))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let body = body_of(response).await;
    assert_eq!(body["output"]["type"], "collection");
    assert_eq!(body["output"]["items"][0]["type"], "object");

    // Failures carry an empty collection.
    let response = router.oneshot(post("/fix/slow?timeout=abc")).await.unwrap();
    let body = body_of(response).await;
    assert!(body["output"]["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_disable_state_survives_manager_restart() {
    let (app, dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/_meta/servers/fix/disable")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_of(response).await;
    assert_eq!(body["enabled"], false);

    // A fresh manager over the same file observes the persisted state.
    let reloaded =
        portico_core::StateManager::new(dir.path().join("portico_state.json"));
    use portico_core::state::StateQuery;
    assert!(!reloaded.is_server_enabled("fix"));
    assert!(reloaded.is_server_enabled("other"));
}

#[tokio::test]
async fn test_metrics_report_latency_after_call() {
    let (app, _dir) = app_with_fixture(RuntimeSettings::default()).await;
    let router = build_main_router(app.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/fix/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"hello"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = app.metrics().snapshot();
    assert_eq!(snapshot["calls"], 1);
    assert_eq!(snapshot["perTool"]["fix/echo"]["calls"], 1);
    assert_eq!(snapshot["perTool"]["fix/echo"]["errors"], 0);
    assert!(snapshot["perTool"]["fix/echo"]["avgLatencyMs"].as_f64().unwrap() >= 0.0);
}
