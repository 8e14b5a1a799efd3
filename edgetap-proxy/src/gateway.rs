use crate::capture;
use crate::emitter::Emitter;
use crate::forward::{OriginClient, OriginResponse};
use axum::Router as AxumRouter;
use bytes::Bytes;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use edgetap_channel::DeliveryChannel;
use edgetap_core::config::GatewayConfig;
use edgetap_core::event::{RawEvent, RequestSnapshot, ResponseSnapshot, Timing};
use edgetap_core::{EdgetapError, timefmt};
use edgetap_observability::{AccessLogEntry, MetricsCollector};
use http::{HeaderValue, StatusCode, header};
use http_body_util::LengthLimitError;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Header set on gateway-generated error responses.
pub const ERROR_HEADER: &str = "x-edgetap-error";

/// Shared state for every gateway request. Nothing in here is mutated per
/// request; the channel handles its own concurrency.
pub struct GatewayState {
    pub origin: OriginClient,
    pub emitter: Emitter,
    pub metrics: Arc<MetricsCollector>,
    pub body_snapshot_limit: usize,
    /// Largest inbound body buffered for forwarding.
    pub max_request_body: usize,
    pub emit_on_origin_failure: bool,
}

impl GatewayState {
    pub fn new(
        config: &GatewayConfig,
        channel: Arc<dyn DeliveryChannel>,
        metrics: Arc<MetricsCollector>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            origin: OriginClient::new(config)?,
            emitter: Emitter::new(channel, &config.emit, Arc::clone(&metrics)),
            metrics,
            body_snapshot_limit: config.max_body_snapshot_bytes,
            max_request_body: config.max_request_body_bytes.max(1),
            emit_on_origin_failure: config.emit_on_origin_failure,
        })
    }
}

/// Every path and method goes through [`handle`].
pub fn build_gateway_router(state: Arc<GatewayState>) -> AxumRouter {
    AxumRouter::new().fallback(handle).with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: Arc<GatewayState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Gateway listening");
    axum::serve(listener, build_gateway_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Snapshot, forward, emit, respond.
pub async fn handle(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let event_id = Uuid::new_v4().to_string();
    let arrival = timefmt::now_millis();
    let started = Instant::now();

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, state.max_request_body).await {
        Ok(body) => body,
        Err(e) => {
            // Never forwarded, but still recorded with what was captured.
            let too_large = e.source().is_some_and(|s| s.is::<LengthLimitError>());
            let mut request = capture::snapshot_request(
                event_id,
                arrival,
                &parts,
                &Bytes::new(),
                state.body_snapshot_limit,
            );
            request.body_truncated = too_large;
            let response = if too_large {
                warn!(
                    event_id = %request.id,
                    limit = state.max_request_body,
                    "Request body exceeds limit"
                );
                error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request body too large",
                    "request-too-large",
                )
            } else {
                warn!(event_id = %request.id, error = %e, "Failed to read request body");
                error_response(
                    StatusCode::BAD_REQUEST,
                    "request body unreadable",
                    "request-unreadable",
                )
            };
            record(&state, request, &response, started, true);
            return response;
        }
    };

    let request = capture::snapshot_request(
        event_id,
        arrival,
        &parts,
        &body,
        state.body_snapshot_limit,
    );

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let outcome = state
        .origin
        .forward(&parts.method, path_and_query, &parts.headers, body)
        .await;
    let (response, emit) = match outcome {
        Ok(origin) => (origin_response(origin), true),
        Err(e) => {
            warn!(
                event_id = %request.id,
                method = %request.method,
                path = %request.pathname,
                error = %e,
                "Origin request failed"
            );
            (failure_response(&e), state.emit_on_origin_failure)
        }
    };

    record(&state, request, &response, started, emit);
    response
}

/// Metrics, access log and (when `emit`) the telemetry event for one
/// finished request.
fn record(
    state: &GatewayState,
    request: RequestSnapshot,
    response: &Response,
    started: Instant,
    emit: bool,
) {
    let elapsed = started.elapsed();
    let timing = Timing::new(request.timestamp, elapsed);
    let snapshot = ResponseSnapshot {
        status: response.status().as_u16(),
        headers: capture::snapshot_headers(response.headers()),
    };
    state
        .metrics
        .record_proxy(&request.method, snapshot.status, elapsed.as_secs_f64());

    let event = RawEvent {
        request,
        response: snapshot,
        timing,
    };
    AccessLogEntry::from_event(&event).log();
    if emit {
        // The request path never waits for, or learns about, delivery.
        drop(state.emitter.emit(event));
    }
}

fn origin_response(origin: OriginResponse) -> Response {
    let mut response = Response::new(Body::from(origin.body));
    *response.status_mut() = origin.status;
    *response.headers_mut() = origin.headers;
    response
}

fn failure_response(error: &EdgetapError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        error.to_json_body(),
    )
        .into_response();
    let reason = match error {
        EdgetapError::OriginTimeout(_) => "origin-timeout",
        _ => "origin-unavailable",
    };
    response
        .headers_mut()
        .insert(ERROR_HEADER, HeaderValue::from_static(reason));
    response
}

fn error_response(status: StatusCode, message: &'static str, reason: &'static str) -> Response {
    let body = serde_json::json!({ "error": message, "status": status.as_u16() }).to_string();
    let mut response =
        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response();
    response
        .headers_mut()
        .insert(ERROR_HEADER, HeaderValue::from_static(reason));
    response
}
