//! Integration tests for the query service router.
//!
//! Uses `tower::ServiceExt::oneshot` to call handlers without binding a real
//! TCP port; every test gets a fresh in-memory store.

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use chrono::{TimeZone, Utc};
use edgetap_api::{ApiState, build_api_router};
use edgetap_core::config::{ApiConfig, CorsConfig};
use edgetap_core::{Cursor, Page, StorageRow};
use edgetap_observability::MetricsCollector;
use edgetap_store::{LogStore, MemoryStore, StoreError};
use std::sync::Arc;
use tower::ServiceExt; // .oneshot()

// ── Helpers ──────────────────────────────────────────────────────────────────

fn row(ms: i64, id: &str) -> StorageRow {
    StorageRow {
        ts: Utc.timestamp_millis_opt(1_739_176_200_000 + ms).unwrap(),
        request_id: id.to_string(),
        method: "GET".into(),
        url: format!("https://example.com/{id}"),
        path: "/".into(),
        status: 200,
        latency_ms: 3,
        country: String::new(),
        city: String::new(),
        colo: String::new(),
        user_agent: String::new(),
        ip: String::new(),
        headers_json: "{}".into(),
        cf_json: "{}".into(),
    }
}

struct DownStore;

#[async_trait]
impl LogStore for DownStore {
    async fn insert_batch(&self, _rows: &[StorageRow]) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn list(&self, _limit: usize, _cursor: Option<&Cursor>) -> Result<Page, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn backend(&self) -> &'static str {
        "down"
    }
}

async fn seeded(n: i64) -> Arc<dyn LogStore> {
    let store = MemoryStore::new();
    let rows: Vec<StorageRow> = (0..n).map(|i| row(i, &format!("r{i:02}"))).collect();
    store.insert_batch(&rows).await.unwrap();
    Arc::new(store)
}

fn app_with(store: Arc<dyn LogStore>, metrics: Arc<MetricsCollector>) -> axum::Router {
    let state = Arc::new(ApiState::new(&ApiConfig::default(), store, metrics));
    build_api_router(state, &CorsConfig::default()).unwrap()
}

fn app(store: Arc<dyn LogStore>) -> axum::Router {
    app_with(store, Arc::new(MetricsCollector::disabled()))
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn ids(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["request_id"].as_str().unwrap().to_string())
        .collect()
}

// ── /logs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_page_uses_default_limit_and_returns_cursor() {
    let resp = app(seeded(15).await).oneshot(get_req("/logs")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 10);
    assert_eq!(ids(&body)[0], "r14");
    assert_eq!(
        body["next_cursor"],
        "2025-02-10T08:30:00.005Z|r05"
    );
}

#[tokio::test]
async fn cursor_continues_strictly_after_boundary() {
    let store = seeded(5).await;
    let first = body_json(
        app(Arc::clone(&store))
            .oneshot(get_req("/logs?limit=3"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ids(&first), vec!["r04", "r03", "r02"]);

    let cursor = first["next_cursor"].as_str().unwrap().replace('|', "%7C");
    let second = body_json(
        app(store)
            .oneshot(get_req(&format!("/logs?limit=3&cursor={cursor}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ids(&second), vec!["r01", "r00"]);
    assert!(second["next_cursor"].is_null());
}

#[tokio::test]
async fn empty_store_returns_empty_page() {
    let resp = app(seeded(0).await).oneshot(get_req("/logs")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"], serde_json::json!([]));
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn oversize_limit_is_clamped_to_max() {
    let resp = app(seeded(600).await)
        .oneshot(get_req("/logs?limit=100000"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 500);
}

#[tokio::test]
async fn invalid_limit_returns_400() {
    let resp = app(seeded(1).await)
        .oneshot(get_req("/logs?limit=abc"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn malformed_cursor_returns_400() {
    let resp = app(seeded(1).await)
        .oneshot(get_req("/logs?cursor=not-a-cursor"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_failure_returns_502_without_data() {
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    let resp = app_with(Arc::new(DownStore), Arc::clone(&metrics))
        .oneshot(get_req("/logs"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(resp).await;
    assert!(body.get("data").is_none());
    assert_eq!(
        metrics
            .query_requests_total
            .as_ref()
            .unwrap()
            .with_label_values(&["store_error"])
            .get(),
        1
    );
}

// ── CORS ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_allows_any_origin_for_get() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/logs")
        .header("origin", "https://dash.example")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let resp = app(seeded(0).await).oneshot(req).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    let methods = resp
        .headers()
        .get("access-control-allow-methods")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("GET"));
    assert!(methods.contains("OPTIONS"));
}

#[tokio::test]
async fn cors_origins_come_from_config() {
    let state = Arc::new(ApiState::new(
        &ApiConfig::default(),
        seeded(0).await,
        Arc::new(MetricsCollector::disabled()),
    ));
    let cors = CorsConfig {
        allowed_origins: vec!["https://dash.example".into()],
        ..Default::default()
    };
    let app = build_api_router(state, &cors).unwrap();
    let req = Request::builder()
        .uri("/logs")
        .header("origin", "https://dash.example")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "https://dash.example"
    );
}

// ── Misc ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_store_backend() {
    let resp = app(seeded(0).await).oneshot(get_req("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn unknown_path_returns_banner() {
    let resp = app(seeded(0).await).oneshot(get_req("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"edgetap query service");
}
