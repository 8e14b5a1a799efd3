use crate::server::ApiState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn health_check(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.backend(),
        "metrics_enabled": state.metrics.is_enabled(),
    }))
}

/// Prometheus text exposition; empty when metrics are disabled.
pub async fn metrics(State(state): State<Arc<ApiState>>) -> String {
    state.metrics.render()
}

pub async fn banner() -> &'static str {
    "edgetap query service"
}
