//! Integration tests for the request log listing endpoints.
//!
//! Spins up a real axum router over an in-memory store, seeds log rows
//! directly through the write pool, and makes HTTP requests via
//! `tower::ServiceExt::oneshot` (no TCP listener needed).
//!
//! Request persistence is switched off here so the listings only contain
//! seeded rows; the pipeline tests cover what gets recorded.

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use tower::ServiceExt;

use reqlog::config::{Config, DatabaseConfig, LoggingConfig};
use reqlog::server::{create_router, AppState};
use reqlog::storage::Store;
use reqlog::telemetry::NoopSink;

async fn setup_test_app() -> (axum::Router, Store) {
    let store = Store::open(&DatabaseConfig::memory())
        .await
        .expect("Failed to open in-memory store");

    let config = Config {
        database: DatabaseConfig::memory(),
        logging: LoggingConfig {
            log_requests: false,
            ..LoggingConfig::default()
        },
        ..Config::default()
    };

    let app = create_router(AppState::new(store.clone(), config), Arc::new(NoopSink));
    (app, store)
}

/// Insert a log row; `created_at` of `None` takes the column default (now).
async fn seed_log(store: &Store, method: &str, uri: &str, status: u16, created_at: Option<&str>) {
    let mut tx = store.begin_write().await.unwrap();
    match created_at {
        Some(ts) => {
            sqlx::query(
                "INSERT INTO logs (request_id, method, uri, status, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(format!("seed-{}", uri))
            .bind(method)
            .bind(uri)
            .bind(status as i64)
            .bind(ts)
            .execute(&mut *tx)
            .await
            .unwrap();
        }
        None => {
            sqlx::query("INSERT INTO logs (request_id, method, uri, status) VALUES (?, ?, ?, ?)")
                .bind(format!("seed-{}", uri))
                .bind(method)
                .bind(uri)
                .bind(status as i64)
                .execute(&mut *tx)
                .await
                .unwrap();
        }
    }
    tx.commit().await.unwrap();
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn uris(body: &serde_json::Value) -> Vec<String> {
    body.as_array()
        .expect("listing should be a JSON array")
        .iter()
        .map(|row| row["uri"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// GET /logs
// ============================================================================

#[tokio::test]
async fn test_list_all_newest_first() {
    let (app, store) = setup_test_app().await;
    seed_log(&store, "GET", "/a", 200, None).await;
    seed_log(&store, "POST", "/b", 201, None).await;
    seed_log(&store, "GET", "/c", 404, None).await;

    let (status, body) = get(&app, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uris(&body), vec!["/c", "/b", "/a"]);

    let first = &body[0];
    assert_eq!(first["method"], "GET");
    assert_eq!(first["status"], 404);
    assert!(first["id"].as_i64().unwrap() > 0);
    assert!(first["created_at"].as_str().is_some());
}

#[tokio::test]
async fn test_list_all_empty() {
    let (app, _store) = setup_test_app().await;
    let (status, body) = get(&app, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

// ============================================================================
// GET /logs/paginated
// ============================================================================

#[tokio::test]
async fn test_paginated_offset_and_limit() {
    let (app, store) = setup_test_app().await;
    for i in 0..5 {
        seed_log(&store, "GET", &format!("/p{}", i), 200, None).await;
    }

    let (status, body) = get(&app, "/logs/paginated?offset=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uris(&body), vec!["/p3", "/p2"]);

    let (_, body) = get(&app, "/logs/paginated?offset=10&limit=2").await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_paginated_defaults_when_absent() {
    let (app, store) = setup_test_app().await;
    for i in 0..3 {
        seed_log(&store, "GET", &format!("/d{}", i), 200, None).await;
    }

    let (status, body) = get(&app, "/logs/paginated").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_paginated_malformed_values_rejected() {
    let (app, _store) = setup_test_app().await;

    for uri in [
        "/logs/paginated?limit=abc",
        "/logs/paginated?offset=-1",
        "/logs/paginated?limit=1.5",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {}", uri);
        assert_eq!(body["error"]["code"], 400);
        assert_eq!(body["error"]["type"], "reqlog_error");
    }
}

// ============================================================================
// GET /logs/filtered
// ============================================================================

#[tokio::test]
async fn test_filtered_requires_limit_offset_and_time_range() {
    let (app, _store) = setup_test_app().await;

    let (status, body) = get(&app, "/logs/filtered?limit=10&offset=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("timeRange"), "message: {}", message);

    let (status, body) = get(&app, "/logs/filtered?method=GET").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("limit"));
    assert!(message.contains("offset"));
}

#[tokio::test]
async fn test_filtered_by_method_and_status() {
    let (app, store) = setup_test_app().await;
    seed_log(&store, "GET", "/ok", 200, None).await;
    seed_log(&store, "GET", "/missing", 404, None).await;
    seed_log(&store, "POST", "/created", 201, None).await;

    let (status, body) = get(
        &app,
        "/logs/filtered?method=GET&timeRange=-1%20hour&offset=0&limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uris(&body), vec!["/missing", "/ok"]);

    let (_, body) = get(
        &app,
        "/logs/filtered?method=GET&response=404&timeRange=-1%20hour&offset=0&limit=10",
    )
    .await;
    assert_eq!(uris(&body), vec!["/missing"]);

    let (_, body) = get(
        &app,
        "/logs/filtered?response=201&timeRange=-1%20hour&offset=0&limit=10",
    )
    .await;
    assert_eq!(uris(&body), vec!["/created"]);
}

#[tokio::test]
async fn test_filtered_absent_optionals_match_basic_listing() {
    let (app, store) = setup_test_app().await;
    for i in 0..6 {
        let method = if i % 2 == 0 { "GET" } else { "DELETE" };
        seed_log(&store, method, &format!("/w{}", i), 200 + i, None).await;
    }

    let (_, filtered) = get(
        &app,
        "/logs/filtered?timeRange=-100%20years&offset=1&limit=3",
    )
    .await;
    let (_, basic) = get(&app, "/logs/paginated?offset=1&limit=3").await;
    assert_eq!(filtered, basic);
    assert_eq!(filtered.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_filtered_excludes_rows_before_window() {
    let (app, store) = setup_test_app().await;
    seed_log(&store, "GET", "/ancient", 200, Some("2000-01-01 00:00:00")).await;
    seed_log(&store, "GET", "/recent", 200, None).await;

    let (status, body) = get(
        &app,
        "/logs/filtered?timeRange=-1%20hour&offset=0&limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uris(&body), vec!["/recent"]);

    let (_, body) = get(
        &app,
        "/logs/filtered?timeRange=-30%20years&offset=0&limit=10",
    )
    .await;
    assert_eq!(uris(&body), vec!["/recent", "/ancient"]);
}

#[tokio::test]
async fn test_filtered_malformed_inputs_rejected() {
    let (app, _store) = setup_test_app().await;

    for uri in [
        "/logs/filtered?timeRange=yesterday&offset=0&limit=10",
        "/logs/filtered?timeRange=-1%20fortnight&offset=0&limit=10",
        "/logs/filtered?timeRange=-1%20hour&offset=0&limit=-5",
        "/logs/filtered?timeRange=-1%20hour&offset=x&limit=10",
        "/logs/filtered?timeRange=-1%20hour&offset=0&limit=10&response=ok",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {}", uri);
        assert_eq!(body["error"]["code"], 400);
    }
}

#[tokio::test]
async fn test_filtered_limit_is_capped() {
    let (app, store) = setup_test_app().await;
    seed_log(&store, "GET", "/only", 200, None).await;

    let (status, body) = get(
        &app,
        "/logs/filtered?timeRange=-1%20day&offset=0&limit=999999",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uris(&body), vec!["/only"]);
}

#[tokio::test]
async fn test_backend_failure_is_server_error() {
    let (app, store) = setup_test_app().await;
    store.close().await;

    let (status, body) = get(
        &app,
        "/logs/filtered?timeRange=-1%20hour&offset=0&limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], 500);
}
