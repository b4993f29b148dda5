//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use expiry_grid::{api::create_router, AppState, Config};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> (Router, AppState) {
    let config = Config {
        atomicity_mode: "transactional".to_string(),
        sweep_interval_ms: 20,
        ..Config::default()
    };
    let state = AppState::from_config(&config).unwrap();
    (create_router(state.clone()), state)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// == PUT Endpoint Tests ==

#[tokio::test]
async fn test_put_endpoint_success() {
    let (app, state) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/cache/test_key")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"value":"test_value"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("test_key"));
    assert_eq!(json["stored"], true);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_put_endpoint_with_expiry_sets_ttl() {
    let (app, state) = create_test_app();

    let (status, _) = send(
        &app,
        "PUT",
        "/cache/ttl_key",
        Some(r#"{"value":"v","expiry":{"create_ms":60000,"update_ms":61000}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "GET", "/cache/ttl_key/ttl", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ttl_ms"], 60_000);
    assert!(json["expire_time_ms"].as_u64().unwrap() > 0);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_put_endpoint_zero_create_is_never_visible() {
    let (app, state) = create_test_app();

    let (status, json) = send(
        &app,
        "PUT",
        "/cache/gone",
        Some(r#"{"value":"v","expiry":{"create_ms":0}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stored"], false);

    let (status, _) = send(&app, "GET", "/cache/gone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_put_endpoint_rejects_negative_duration() {
    let (app, state) = create_test_app();

    let (status, json) = send(
        &app,
        "PUT",
        "/cache/k",
        Some(r#"{"value":"v","expiry":{"access_ms":-1}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("negative"));
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_put_endpoint_invalid_json() {
    let (app, state) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/cache/k")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"wrong":"shape"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    state.cluster().shutdown();
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_roundtrip() {
    let (app, state) = create_test_app();

    send(&app, "PUT", "/cache/greeting", Some(r#"{"value":"hello"}"#)).await;
    let (status, json) = send(&app, "GET", "/cache/greeting", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "greeting");
    assert_eq!(json["value"], "hello");
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_get_endpoint_access_override_sets_ttl() {
    let (app, state) = create_test_app();

    send(&app, "PUT", "/cache/k", Some(r#"{"value":"v"}"#)).await;
    let (_, json) = send(&app, "GET", "/cache/k/ttl", None).await;
    assert_eq!(json["ttl_ms"], 0);
    assert!(json["remaining_ms"].is_null());

    let (status, _) = send(&app, "GET", "/cache/k?access=5000", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&app, "GET", "/cache/k/ttl", None).await;
    assert_eq!(json["ttl_ms"], 5_000);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_get_endpoint_zero_access_removes_after_read() {
    let (app, state) = create_test_app();

    send(&app, "PUT", "/cache/once", Some(r#"{"value":"v"}"#)).await;

    let (status, json) = send(&app, "GET", "/cache/once?access=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], "v");

    let (status, _) = send(&app, "GET", "/cache/once", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let (app, state) = create_test_app();

    let (status, json) = send(&app, "GET", "/cache/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("missing"));
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_get_endpoint_rejects_oversized_key() {
    let (app, state) = create_test_app();
    let uri = format!("/cache/{}", "k".repeat(300));

    let (status, json) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("maximum length"));
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_get_endpoint_after_expiry() {
    let (app, state) = create_test_app();

    send(
        &app,
        "PUT",
        "/cache/short",
        Some(r#"{"value":"v","expiry":{"create_ms":100}}"#),
    )
    .await;

    let mut status = StatusCode::OK;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = send(&app, "GET", "/cache/short/ttl", None).await.0;
        if status == StatusCode::NOT_FOUND {
            break;
        }
    }
    assert_eq!(status, StatusCode::NOT_FOUND);
    state.cluster().shutdown();
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint() {
    let (app, state) = create_test_app();

    send(&app, "PUT", "/cache/to_delete", Some(r#"{"value":"v"}"#)).await;

    let (status, json) = send(&app, "DELETE", "/cache/to_delete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("deleted"));

    let (status, _) = send(&app, "DELETE", "/cache/to_delete", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    state.cluster().shutdown();
}

// == Stats and Health Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint_tracks_reads() {
    let (app, state) = create_test_app();

    send(&app, "PUT", "/cache/a", Some(r#"{"value":"1"}"#)).await;
    send(&app, "GET", "/cache/a?access=60000", None).await;
    send(&app, "GET", "/cache/nope?access=60000", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["nodes"], 3);
    assert!(json["puts"].as_u64().unwrap() >= 2);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
    state.cluster().shutdown();
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, state) = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
    state.cluster().shutdown();
}
