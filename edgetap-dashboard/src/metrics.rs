//! Rolling metrics derived from the visible window of the buffer.
//!
//! Everything here is a pure function of the rows passed in; nothing is
//! cached between refreshes.

use edgetap_core::StorageRow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Row counts per status class. Classes other than 2xx..5xx are counted
/// nowhere, so the buckets may sum to less than the window size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusHistogram {
    pub success: usize,
    pub redirect: usize,
    pub client_error: usize,
    pub server_error: usize,
}

impl StatusHistogram {
    pub fn from_rows(rows: &[StorageRow]) -> Self {
        let mut hist = Self::default();
        for row in rows {
            match row.status_class() {
                2 => hist.success += 1,
                3 => hist.redirect += 1,
                4 => hist.client_error += 1,
                5 => hist.server_error += 1,
                _ => {}
            }
        }
        hist
    }

    /// Count for a leading digit in `2..=5`.
    pub fn get(&self, class: u8) -> usize {
        match class {
            2 => self.success,
            3 => self.redirect,
            4 => self.client_error,
            5 => self.server_error,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathMetrics {
    pub path: String,
    pub total: usize,
    /// Rows with status >= 400.
    pub errors: usize,
    /// Percentage rounded to one decimal place.
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p95_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub total: usize,
    pub status: StatusHistogram,
    pub paths: Vec<PathMetrics>,
}

impl DerivedMetrics {
    pub fn compute(rows: &[StorageRow]) -> Self {
        let mut grouped: BTreeMap<&str, (usize, Vec<u64>)> = BTreeMap::new();
        for row in rows {
            let entry = grouped.entry(row.path.as_str()).or_default();
            if row.is_error() {
                entry.0 += 1;
            }
            entry.1.push(row.latency_ms);
        }

        let mut paths: Vec<PathMetrics> = grouped
            .into_iter()
            .map(|(path, (errors, mut latencies))| {
                latencies.sort_unstable();
                let total = latencies.len();
                let sum: u64 = latencies.iter().sum();
                PathMetrics {
                    path: path.to_string(),
                    total,
                    errors,
                    error_rate: error_rate(errors, total),
                    avg_latency_ms: if total == 0 {
                        0
                    } else {
                        (sum as f64 / total as f64).round() as u64
                    },
                    min_latency_ms: latencies.first().copied().unwrap_or(0),
                    max_latency_ms: latencies.last().copied().unwrap_or(0),
                    p95_latency_ms: p95(&latencies).unwrap_or(0),
                }
            })
            .collect();
        paths.sort_by(|a, b| path_order(&a.path, &b.path));

        Self {
            total: rows.len(),
            status: StatusHistogram::from_rows(rows),
            paths,
        }
    }

    /// `(path, count)` pairs in display order.
    pub fn distribution(&self) -> Vec<(&str, usize)> {
        self.paths.iter().map(|p| (p.path.as_str(), p.total)).collect()
    }
}

/// `errors / total * 100` rounded to one decimal, `0.0` for an empty group.
pub fn error_rate(errors: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (errors as f64 * 1000.0 / total as f64).round() / 10.0
}

/// Discrete 95th percentile: `sorted[max(0, floor(n * 0.95) - 1)]`.
///
/// `floor(n * 0.95)` is computed as `n * 95 / 100` in integers, which is
/// exact. Input must already be sorted ascending.
pub fn p95(sorted: &[u64]) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() * 95 / 100).saturating_sub(1);
    sorted.get(rank).copied()
}

/// Root path first, everything else lexicographic.
pub fn path_order(a: &str, b: &str) -> Ordering {
    match (a == "/", b == "/") {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: usize, path: &str, status: u16, latency_ms: u64) -> StorageRow {
        StorageRow {
            ts: Utc.with_ymd_and_hms(2025, 2, 10, 8, 30, 0).unwrap(),
            request_id: format!("r{id}"),
            method: "GET".into(),
            url: format!("https://example.com{path}"),
            path: path.into(),
            status,
            latency_ms,
            country: String::new(),
            city: String::new(),
            colo: String::new(),
            user_agent: String::new(),
            ip: String::new(),
            headers_json: "{}".into(),
            cf_json: "{}".into(),
        }
    }

    // ── Percentile ───────────────────────────────────────────────────────────

    #[test]
    fn p95_of_ten_is_ninth_value() {
        let sorted: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        assert_eq!(p95(&sorted), Some(90));
    }

    #[test]
    fn p95_small_samples_use_first_rank() {
        assert_eq!(p95(&[7]), Some(7));
        assert_eq!(p95(&[3, 9]), Some(3));
        assert_eq!(p95(&[]), None);
    }

    #[test]
    fn p95_of_twenty_is_nineteenth_value() {
        let sorted: Vec<u64> = (1..=20).collect();
        assert_eq!(p95(&sorted), Some(19));
    }

    // ── Error rate ───────────────────────────────────────────────────────────

    #[test]
    fn error_rate_rounds_to_one_decimal() {
        assert_eq!(error_rate(1, 3), 33.3);
        assert_eq!(error_rate(2, 3), 66.7);
        assert_eq!(error_rate(0, 0), 0.0);
        assert_eq!(error_rate(4, 4), 100.0);
    }

    // ── Aggregation ──────────────────────────────────────────────────────────

    #[test]
    fn per_path_aggregation() {
        let rows: Vec<StorageRow> = (1..=10)
            .map(|i| row(i, "/api", if i == 10 { 500 } else { 200 }, i as u64 * 10))
            .collect();
        let m = DerivedMetrics::compute(&rows);
        let api = &m.paths[0];
        assert_eq!(api.total, 10);
        assert_eq!(api.errors, 1);
        assert_eq!(api.error_rate, 10.0);
        assert_eq!(api.avg_latency_ms, 55);
        assert_eq!(api.min_latency_ms, 10);
        assert_eq!(api.max_latency_ms, 100);
        assert_eq!(api.p95_latency_ms, 90);
    }

    #[test]
    fn average_latency_is_rounded() {
        let rows = vec![row(1, "/", 200, 1), row(2, "/", 200, 2)];
        assert_eq!(DerivedMetrics::compute(&rows).paths[0].avg_latency_ms, 2);
    }

    #[test]
    fn histogram_ignores_unknown_classes() {
        let rows = vec![
            row(1, "/", 200, 1),
            row(2, "/", 301, 1),
            row(3, "/", 404, 1),
            row(4, "/", 503, 1),
            row(5, "/", 101, 1),
            row(6, "/", 0, 1),
        ];
        let m = DerivedMetrics::compute(&rows);
        assert_eq!(m.total, 6);
        for class in 2..=5 {
            assert_eq!(m.status.get(class), 1);
        }
        assert_eq!(m.status.get(1), 0);
    }

    #[test]
    fn root_path_sorts_first() {
        let rows = vec![
            row(1, "/zeta", 200, 1),
            row(2, "/alpha", 200, 1),
            row(3, "/", 200, 1),
            row(4, "/alpha", 404, 1),
        ];
        let m = DerivedMetrics::compute(&rows);
        let order: Vec<&str> = m.paths.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(order, vec!["/", "/alpha", "/zeta"]);
        assert_eq!(m.distribution(), vec![("/", 1), ("/alpha", 2), ("/zeta", 1)]);
    }

    #[test]
    fn empty_window_yields_empty_metrics() {
        let m = DerivedMetrics::compute(&[]);
        assert_eq!(m.total, 0);
        assert!(m.paths.is_empty());
        assert_eq!(m.status, StatusHistogram::default());
    }
}
