use edgetap_core::RawEvent;
use serde::{Deserialize, Serialize};

/// Structured access log entry, one per proxied request.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub request_id: String,
    pub client_ip: String,
    pub method: String,
    pub uri: String,
    pub response_status: u16,
    pub latency_ms: u64,
}

impl AccessLogEntry {
    pub fn from_event(event: &RawEvent) -> Self {
        let client_ip = event
            .request
            .header("cf-connecting-ip")
            .or_else(|| event.request.header("x-forwarded-for"))
            .unwrap_or_default()
            .to_string();
        Self {
            timestamp: edgetap_core::timefmt::format(&event.request.timestamp),
            request_id: event.request.id.clone(),
            client_ip,
            method: event.request.method.clone(),
            uri: format!("{}{}", event.request.pathname, event.request.search),
            response_status: event.response.status,
            latency_ms: event.timing.latency_ms,
        }
    }

    /// Write the entry to the `edgetap::access` tracing target.
    pub fn log(&self) {
        tracing::info!(
            target: "edgetap::access",
            request_id = %self.request_id,
            client_ip = %self.client_ip,
            method = %self.method,
            uri = %self.uri,
            status = self.response_status,
            latency_ms = self.latency_ms,
            "{} {} {} {}ms",
            self.method,
            self.uri,
            self.response_status,
            self.latency_ms,
        );
    }
}
