use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-request telemetry snapshot, exactly as it travels on the delivery
/// channel: `{ request, response, timing }`.
///
/// Built once by the gateway after the origin round trip and handed to the
/// channel by value; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    pub timing: Timing,
}

impl RawEvent {
    pub fn event_id(&self) -> &str {
        &self.request.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.request.timestamp
    }

    /// Encode as the JSON message body.
    pub fn to_message(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_message(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// Unique event id (UUID v4).
    pub id: String,
    #[serde(with = "crate::timefmt")]
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub pathname: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub body_truncated: bool,
    #[serde(default)]
    pub cf: Option<EdgeMetadata>,
}

impl RequestSnapshot {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Edge/client metadata attached by the edge node.
///
/// Known keys are typed; anything else the edge supplies is carried through
/// untouched in `extra` so that `cf_json` keeps it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Edge node (data center) identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, rename = "tlsVersion", skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
    #[serde(default, rename = "tlsCipher", skip_serializing_if = "Option::is_none")]
    pub tls_cipher: Option<String>,
    #[serde(default, rename = "httpProtocol", skip_serializing_if = "Option::is_none")]
    pub http_protocol: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EdgeMetadata {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.city.is_none()
            && self.colo.is_none()
            && self.asn.is_none()
            && self.tls_version.is_none()
            && self.tls_cipher.is_none()
            && self.http_protocol.is_none()
            && self.extra.is_empty()
    }
}

/// Round-trip timing. `start_ms`/`end_ms` are wall-clock epoch
/// milliseconds; `latency_ms` comes from the monotonic clock, so it never
/// goes negative even if the wall clock steps during the request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub start_ms: i64,
    pub end_ms: i64,
    pub latency_ms: u64,
}

impl Timing {
    pub fn new(arrival: DateTime<Utc>, elapsed: Duration) -> Self {
        let latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let start_ms = arrival.timestamp_millis();
        Self {
            start_ms,
            end_ms: start_ms.saturating_add(i64::try_from(latency_ms).unwrap_or(i64::MAX)),
            latency_ms,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}
