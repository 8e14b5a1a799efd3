use crate::cursor::RowKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flattened, append-only projection of a [`crate::RawEvent`].
///
/// One JSON object per line on bulk insert. Rows are never updated or
/// deleted; after a redelivered batch several rows may share a
/// `request_id`, so readers dedup on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRow {
    #[serde(with = "crate::timefmt")]
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub colo: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub headers_json: String,
    #[serde(default)]
    pub cf_json: String,
}

impl StorageRow {
    pub fn key(&self) -> RowKey {
        RowKey::new(self.ts, self.request_id.clone())
    }

    /// Leading decimal digit of the status code (`404` → `4`).
    pub fn status_class(&self) -> u8 {
        let mut status = self.status;
        while status >= 10 {
            status /= 10;
        }
        status as u8
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Request headers parsed back out of `headers_json`.
    ///
    /// Malformed or empty blobs yield an empty map; non-string values are
    /// rendered as their JSON text.
    pub fn headers(&self) -> BTreeMap<String, String> {
        parse_object(&self.headers_json)
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()
    }

    /// Edge metadata parsed back out of `cf_json`, empty on malformed input.
    pub fn edge_metadata(&self) -> Map<String, Value> {
        parse_object(&self.cf_json)
    }
}

/// Parse a JSON object blob, falling back to an empty map for anything that
/// is not an object (including `null`, empty strings and broken JSON).
pub fn parse_object(blob: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(blob) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
