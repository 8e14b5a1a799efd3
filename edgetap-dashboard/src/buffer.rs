use edgetap_core::StorageRow;
use std::collections::HashSet;

/// Client-held, `request_id`-deduplicated rows, newest first.
///
/// Grows at the head from polls and at the tail from "load more". Existing
/// rows are never reordered or evicted, so every merge is idempotent and
/// order-tolerant.
#[derive(Debug, Default, Clone)]
pub struct ClientLogBuffer {
    rows: Vec<StorageRow>,
    seen: HashSet<String>,
}

impl ClientLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and start over from `rows` (duplicates inside `rows`
    /// keep their first occurrence).
    pub fn replace(&mut self, rows: Vec<StorageRow>) {
        self.rows.clear();
        self.seen.clear();
        self.append_older(rows);
    }

    /// Prepend rows not yet present, keeping their relative order.
    /// Returns how many were added.
    pub fn merge_newest(&mut self, rows: Vec<StorageRow>) -> usize {
        let unseen = self.take_unseen(rows);
        let added = unseen.len();
        if added > 0 {
            self.rows.splice(0..0, unseen);
        }
        added
    }

    /// Append rows not yet present to the tail. Returns how many were added.
    pub fn append_older(&mut self, rows: Vec<StorageRow>) -> usize {
        let unseen = self.take_unseen(rows);
        let added = unseen.len();
        self.rows.extend(unseen);
        added
    }

    fn take_unseen(&mut self, rows: Vec<StorageRow>) -> Vec<StorageRow> {
        rows.into_iter()
            .filter(|row| self.seen.insert(row.request_id.clone()))
            .collect()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.seen.contains(request_id)
    }

    pub fn get(&self, request_id: &str) -> Option<&StorageRow> {
        if !self.contains(request_id) {
            return None;
        }
        self.rows.iter().find(|row| row.request_id == request_id)
    }

    pub fn rows(&self) -> &[StorageRow] {
        &self.rows
    }

    /// The newest `limit` rows.
    pub fn window(&self, limit: usize) -> &[StorageRow] {
        &self.rows[..limit.min(self.rows.len())]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: &str) -> StorageRow {
        StorageRow {
            ts: Utc.with_ymd_and_hms(2025, 2, 10, 8, 30, 0).unwrap(),
            request_id: id.into(),
            method: "GET".into(),
            url: "https://example.com/".into(),
            path: "/".into(),
            status: 200,
            latency_ms: 1,
            country: String::new(),
            city: String::new(),
            colo: String::new(),
            user_agent: String::new(),
            ip: String::new(),
            headers_json: "{}".into(),
            cf_json: "{}".into(),
        }
    }

    fn ids(buf: &ClientLogBuffer) -> Vec<&str> {
        buf.rows().iter().map(|r| r.request_id.as_str()).collect()
    }

    fn rows(ids: &[&str]) -> Vec<StorageRow> {
        ids.iter().map(|id| row(id)).collect()
    }

    #[test]
    fn merge_prepends_only_unseen_rows_in_order() {
        let mut buf = ClientLogBuffer::new();
        buf.replace(rows(&["c", "b", "a"]));
        let added = buf.merge_newest(rows(&["e", "d", "c", "b"]));
        assert_eq!(added, 2);
        assert_eq!(ids(&buf), vec!["e", "d", "c", "b", "a"]);
    }

    #[test]
    fn merging_same_poll_twice_is_noop() {
        let mut buf = ClientLogBuffer::new();
        buf.replace(rows(&["b", "a"]));
        let poll = rows(&["d", "c", "b"]);
        buf.merge_newest(poll.clone());
        let snapshot = ids(&buf).join(",");
        assert_eq!(buf.merge_newest(poll), 0);
        assert_eq!(ids(&buf).join(","), snapshot);
    }

    #[test]
    fn stale_poll_does_not_reorder_existing_rows() {
        let mut buf = ClientLogBuffer::new();
        buf.replace(rows(&["c", "b", "a"]));
        buf.merge_newest(rows(&["a", "c"]));
        assert_eq!(ids(&buf), vec!["c", "b", "a"]);
    }

    #[test]
    fn duplicates_within_a_page_are_collapsed() {
        let mut buf = ClientLogBuffer::new();
        buf.replace(rows(&["b", "b", "a"]));
        assert_eq!(ids(&buf), vec!["b", "a"]);
        buf.append_older(rows(&["a", "z", "z"]));
        assert_eq!(ids(&buf), vec!["b", "a", "z"]);
    }

    #[test]
    fn window_is_clamped_to_length() {
        let mut buf = ClientLogBuffer::new();
        buf.replace(rows(&["c", "b", "a"]));
        assert_eq!(buf.window(2).len(), 2);
        assert_eq!(buf.window(20).len(), 3);
        assert!(buf.contains("a"));
        assert!(!buf.contains("q"));
    }
}
