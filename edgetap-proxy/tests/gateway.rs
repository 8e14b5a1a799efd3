//! Gateway behaviour against a throwaway origin on 127.0.0.1.
//!
//! Requests are driven through the router with `tower::ServiceExt::oneshot`;
//! only the origin binds a real port.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::routing::{get, post};
use edgetap_channel::{BatchSource, DeliveryChannel, MemoryQueue};
use edgetap_core::RawEvent;
use edgetap_core::config::{EmitPolicy, GatewayConfig};
use edgetap_observability::MetricsCollector;
use edgetap_proxy::{GatewayState, build_gateway_router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn spawn_origin() -> String {
    let app = Router::new()
        .route(
            "/hello",
            get(|| async { (StatusCode::CREATED, [("x-origin", "yes")], "hi there") }),
        )
        .route("/echo", post(|body: String| async move { body }))
        .route(
            "/host",
            get(|headers: HeaderMap| async move {
                headers
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    app: Router,
    queue: MemoryQueue,
    metrics: Arc<MetricsCollector>,
}

fn harness(config: GatewayConfig, capacity: usize) -> Harness {
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    let queue = MemoryQueue::new(capacity, 5, Duration::from_secs(30), Arc::clone(&metrics));
    let channel: Arc<dyn DeliveryChannel> = Arc::new(queue.clone());
    let state = GatewayState::new(&config, channel, Arc::clone(&metrics)).unwrap();
    Harness {
        app: build_gateway_router(Arc::new(state)),
        queue,
        metrics,
    }
}

fn config(origin: String) -> GatewayConfig {
    GatewayConfig {
        origin_url: origin,
        origin_timeout_ms: 2_000,
        ..Default::default()
    }
}

async fn next_event(queue: &MemoryQueue) -> Option<RawEvent> {
    let batch = queue.receive(1, Duration::from_secs(2)).await.unwrap()?;
    Some(RawEvent::from_message(&batch.messages()[0].payload).unwrap())
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Pass-through ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn origin_response_is_returned_unchanged_and_event_emitted() {
    let h = harness(config(spawn_origin().await), 100);

    let req = Request::builder()
        .uri("/hello?lang=en")
        .header("host", "edge.example")
        .header("user-agent", "curl/8.5")
        .header("cf-connecting-ip", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("x-origin").unwrap(), "yes");
    let body = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"hi there");

    let event = next_event(&h.queue).await.expect("event emitted");
    assert_eq!(event.request.method, "GET");
    assert_eq!(event.request.pathname, "/hello");
    assert_eq!(event.request.search, "?lang=en");
    assert_eq!(event.request.url, "http://edge.example/hello?lang=en");
    assert_eq!(event.request.header("user-agent"), Some("curl/8.5"));
    assert_eq!(event.response.status, 201);
    assert_eq!(
        event.response.headers.get("x-origin").map(String::as_str),
        Some("yes")
    );
    assert!(event.timing.end_ms >= event.timing.start_ms);
    assert_eq!(event.timing.start_ms, event.request.timestamp.timestamp_millis());
    assert!(!event.request.id.is_empty());

    wait_for(|| h.metrics.events_captured.as_ref().unwrap().get() == 1).await;
    assert_eq!(h.metrics.events_captured.as_ref().unwrap().get(), 1);
}

#[tokio::test]
async fn head_response_keeps_origin_content_length() {
    let origin = spawn_origin().await;
    let direct = reqwest::Client::new()
        .head(format!("{origin}/hello"))
        .send()
        .await
        .unwrap();
    let declared = direct.headers().get("content-length").cloned().unwrap();
    assert_eq!(declared, "8");

    let h = harness(config(origin), 100);
    let req = Request::builder()
        .method(Method::HEAD)
        .uri("/hello")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("content-length"), Some(&declared));
    let body = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert!(body.is_empty());

    let event = next_event(&h.queue).await.expect("event emitted");
    assert_eq!(event.request.method, "HEAD");
    assert_eq!(
        event.response.headers.get("content-length").map(String::as_str),
        Some("8")
    );
}

#[tokio::test]
async fn request_body_is_forwarded_whole_but_snapshot_is_bounded() {
    let h = harness(
        GatewayConfig {
            max_body_snapshot_bytes: 4,
            ..config(spawn_origin().await)
        },
        100,
    );

    let req = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .body(Body::from("0123456789"))
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"0123456789");

    let event = next_event(&h.queue).await.unwrap();
    assert_eq!(event.request.body.as_deref(), Some("0123"));
    assert!(event.request.body_truncated);
}

#[tokio::test]
async fn oversized_request_body_is_rejected_and_still_recorded() {
    // Unreachable origin: a forwarded request would come back 502.
    let h = harness(
        GatewayConfig {
            max_request_body_bytes: 16,
            ..config("http://127.0.0.1:1".into())
        },
        100,
    );

    let req = Request::builder()
        .method(Method::POST)
        .uri("/upload?part=1")
        .body(Body::from(vec![b'x'; 64]))
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        resp.headers().get("x-edgetap-error").unwrap(),
        "request-too-large"
    );

    let event = next_event(&h.queue).await.expect("rejection is telemetered");
    assert_eq!(event.response.status, 413);
    assert_eq!(event.request.method, "POST");
    assert_eq!(event.request.pathname, "/upload");
    assert_eq!(event.request.search, "?part=1");
    assert!(event.request.body.is_none());
    assert!(event.request.body_truncated);
}

#[tokio::test]
async fn request_body_at_the_limit_is_forwarded() {
    let h = harness(
        GatewayConfig {
            max_request_body_bytes: 10,
            ..config(spawn_origin().await)
        },
        100,
    );

    let req = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .body(Body::from("0123456789"))
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"0123456789");
}

#[tokio::test]
async fn host_header_is_rewritten_to_origin() {
    let origin = spawn_origin().await;
    let origin_authority = origin.trim_start_matches("http://").to_string();
    let h = harness(config(origin), 100);

    let req = Request::builder()
        .uri("/host")
        .header("host", "edge.example")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    let body = to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&body), origin_authority);
}

// ── Origin failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_origin_yields_502_and_still_emits() {
    let h = harness(config("http://127.0.0.1:1".into()), 100);

    let req = Request::builder().uri("/down").body(Body::empty()).unwrap();
    let resp = h.app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        resp.headers().get("x-edgetap-error").unwrap(),
        "origin-unavailable"
    );

    let event = next_event(&h.queue).await.expect("failure is telemetered");
    assert_eq!(event.response.status, 502);
    assert_eq!(event.request.pathname, "/down");
}

#[tokio::test]
async fn origin_failure_emission_can_be_disabled() {
    let h = harness(
        GatewayConfig {
            emit_on_origin_failure: false,
            ..config("http://127.0.0.1:1".into())
        },
        100,
    );
    let req = Request::builder().uri("/down").body(Body::empty()).unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let batch = h.queue.receive(1, Duration::from_millis(100)).await.unwrap();
    assert!(batch.is_none());
}

#[tokio::test]
async fn slow_origin_yields_504() {
    let h = harness(
        GatewayConfig {
            origin_timeout_ms: 100,
            ..config(spawn_origin().await)
        },
        100,
    );
    let req = Request::builder().uri("/slow").body(Body::empty()).unwrap();
    let resp = h.app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(resp.headers().get("x-edgetap-error").unwrap(), "origin-timeout");

    let event = next_event(&h.queue).await.unwrap();
    assert_eq!(event.response.status, 504);
    assert!(event.timing.latency_ms >= 100);
}

// ── Channel saturation ───────────────────────────────────────────────────────

#[tokio::test]
async fn saturated_channel_drops_event_without_affecting_response() {
    let h = harness(
        GatewayConfig {
            emit: EmitPolicy {
                max_attempts: 2,
                backoff_ms: 1,
            },
            ..config(spawn_origin().await)
        },
        1,
    );
    h.queue.send_raw(b"occupant".to_vec()).await.unwrap();

    let req = Request::builder().uri("/hello").body(Body::empty()).unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let dropped = h.metrics.events_dropped.as_ref().unwrap().clone();
    wait_for(|| dropped.get() == 1).await;
    assert_eq!(dropped.get(), 1);
    assert_eq!(h.queue.ready_len().await, 1);
}
