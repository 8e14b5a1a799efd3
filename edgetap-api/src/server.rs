use crate::handlers;
use axum::Router as AxumRouter;
use axum::routing::get;
use edgetap_core::config::{ApiConfig, CorsConfig};
use edgetap_observability::MetricsCollector;
use edgetap_store::LogStore;
use http::{HeaderName, HeaderValue, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

/// Shared state for the query service. Holds no per-request data.
pub struct ApiState {
    pub store: Arc<dyn LogStore>,
    pub metrics: Arc<MetricsCollector>,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl ApiState {
    pub fn new(config: &ApiConfig, store: Arc<dyn LogStore>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            metrics,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }
}

/// Build the router: `/logs`, `/health`, `/metrics`, plus a banner fallback,
/// all behind the configured CORS policy.
pub fn build_api_router(state: Arc<ApiState>, cors: &CorsConfig) -> anyhow::Result<AxumRouter> {
    Ok(AxumRouter::new()
        .route("/logs", get(handlers::logs::list_logs))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .fallback(handlers::health::banner)
        .layer(cors_layer(cors)?)
        .with_state(state))
}

/// Translate the CORS section into a layer. `"*"` in any list means any.
pub fn cors_layer(config: &CorsConfig) -> anyhow::Result<CorsLayer> {
    let wildcard = |values: &[String]| values.iter().any(|v| v.trim() == "*");

    let mut layer = CorsLayer::new();
    layer = if wildcard(&config.allowed_origins) {
        layer.allow_origin(Any)
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|o| HeaderValue::from_str(o.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        layer.allow_origin(AllowOrigin::list(origins))
    };
    layer = if wildcard(&config.allowed_methods) {
        layer.allow_methods(Any)
    } else {
        let methods = config
            .allowed_methods
            .iter()
            .map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        layer.allow_methods(methods)
    };
    layer = if wildcard(&config.allowed_headers) {
        layer.allow_headers(Any)
    } else {
        let headers = config
            .allowed_headers
            .iter()
            .map(|h| HeaderName::from_bytes(h.trim().to_ascii_lowercase().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        layer.allow_headers(headers)
    };
    Ok(layer)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    config: &ApiConfig,
    state: Arc<ApiState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_api_router(state, &config.cors)?;
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "Query API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
