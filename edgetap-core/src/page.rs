use crate::cursor::Cursor;
use crate::row::StorageRow;
use serde::{Deserialize, Serialize};

/// One page of rows, newest first, plus the cursor for the next page.
///
/// Serializes to the query endpoint's body: `{ "data": [...], "next_cursor": "..." | null }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<StorageRow>,
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            next_cursor: None,
        }
    }

    /// Wrap rows already ordered `(ts DESC, request_id DESC)` and truncated
    /// to `limit`. A cursor is produced only for a full page.
    pub fn from_rows(data: Vec<StorageRow>, limit: usize) -> Self {
        let next_cursor = if limit > 0 && data.len() == limit {
            data.last().map(|row| Cursor::new(row.key()))
        } else {
            None
        };
        Self { data, next_cursor }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(ms: i64, id: &str) -> StorageRow {
        serde_json::from_value(serde_json::json!({
            "ts": crate::timefmt::format(&Utc.timestamp_millis_opt(ms).unwrap()),
            "request_id": id,
            "method": "GET",
            "url": "https://x/",
            "path": "/",
            "status": 200,
            "latency_ms": 1
        }))
        .unwrap()
    }

    #[test]
    fn full_page_points_at_last_row() {
        let page = Page::from_rows(vec![row(3, "c"), row(2, "b")], 2);
        let cursor = page.next_cursor.unwrap();
        assert_eq!(cursor.key().request_id, "b");
    }

    #[test]
    fn short_page_has_no_cursor() {
        let page = Page::from_rows(vec![row(3, "c")], 2);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn serializes_null_cursor() {
        let v = serde_json::to_value(Page::empty()).unwrap();
        assert_eq!(v["next_cursor"], serde_json::Value::Null);
        assert_eq!(v["data"], serde_json::json!([]));
    }
}
