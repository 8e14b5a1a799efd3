//! Pure projection of wire events into storage rows. No I/O, no delivery
//! state.

use edgetap_channel::Message;
use edgetap_core::{RawEvent, StorageRow};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("message {index} ({delivery_id}) is not a valid event: {source}")]
pub struct DecodeError {
    pub index: usize,
    pub delivery_id: String,
    #[source]
    pub source: serde_json::Error,
}

/// Flatten one event into its storage row.
///
/// Missing edge metadata and headers become empty strings; `headers_json`
/// and `cf_json` are always valid JSON objects.
pub fn to_row(event: &RawEvent) -> StorageRow {
    let request = &event.request;
    let cf = request.cf.as_ref();

    StorageRow {
        ts: request.timestamp,
        request_id: request.id.clone(),
        method: request.method.clone(),
        url: request.url.clone(),
        path: request.pathname.clone(),
        status: event.response.status,
        latency_ms: event.timing.latency_ms,
        country: cf.and_then(|m| m.country.clone()).unwrap_or_default(),
        city: cf.and_then(|m| m.city.clone()).unwrap_or_default(),
        colo: cf.and_then(|m| m.colo.clone()).unwrap_or_default(),
        user_agent: request.header("user-agent").unwrap_or_default().to_string(),
        ip: client_ip(event),
        headers_json: serde_json::to_string(&request.headers).unwrap_or_else(|_| "{}".into()),
        cf_json: cf
            .and_then(|m| serde_json::to_string(m).ok())
            .unwrap_or_else(|| "{}".into()),
    }
}

/// `cf-connecting-ip`, else the first hop of `x-forwarded-for`, else empty.
pub fn client_ip(event: &RawEvent) -> String {
    if let Some(ip) = event.request.header("cf-connecting-ip") {
        return ip.trim().to_string();
    }
    event
        .request
        .header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(|hop| hop.trim().to_string())
        .unwrap_or_default()
}

/// Decode and transform a whole batch. Fails on the first undecodable
/// message so the caller can settle the batch as a unit.
pub fn decode_rows(messages: &[Message]) -> Result<Vec<StorageRow>, DecodeError> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            RawEvent::from_message(&message.payload)
                .map(|event| to_row(&event))
                .map_err(|source| DecodeError {
                    index,
                    delivery_id: message.delivery_id.clone(),
                    source,
                })
        })
        .collect()
}
