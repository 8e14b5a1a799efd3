use crate::timefmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Total ordering key of a stored row: `(timestamp, event_id)`.
///
/// Field order matters: the derived `Ord` compares `ts` first and breaks
/// ties on `request_id`, which is the ordering the query service pages over
/// (descending).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub ts: DateTime<Utc>,
    pub request_id: String,
}

impl RowKey {
    pub fn new(ts: DateTime<Utc>, request_id: impl Into<String>) -> Self {
        Self {
            ts,
            request_id: request_id.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is missing the '|' separator")]
    MissingSeparator,

    #[error("cursor has an invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("cursor has an empty request id")]
    EmptyId,
}

/// Exclusive lower bound for the next page, encoded as `"<timestamp>|<request_id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(RowKey);

impl Cursor {
    pub fn new(key: RowKey) -> Self {
        Self(key)
    }

    pub fn key(&self) -> &RowKey {
        &self.0
    }

    pub fn into_key(self) -> RowKey {
        self.0
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", timefmt::format(&self.0.ts), self.0.request_id)
    }

    pub fn decode(raw: &str) -> Result<Self, CursorError> {
        let (ts, id) = raw.split_once('|').ok_or(CursorError::MissingSeparator)?;
        let ts = timefmt::parse(ts).ok_or_else(|| CursorError::InvalidTimestamp(ts.to_string()))?;
        if id.is_empty() {
            return Err(CursorError::EmptyId);
        }
        Ok(Self(RowKey::new(ts, id)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl From<RowKey> for Cursor {
    fn from(key: RowKey) -> Self {
        Self(key)
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Cursor::decode(&raw).map_err(serde::de::Error::custom)
    }
}
