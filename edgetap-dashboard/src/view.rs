use edgetap_core::{StorageRow, timefmt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Placeholder shown for absent values in the detail view.
pub const MISSING: &str = "—";

/// Status-class filter for the row table: `all`, or one of `2`..`5`
/// (`2xx` spelling accepted).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Class(u8),
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || s == "all" {
            return Ok(StatusFilter::All);
        }
        match s.trim_end_matches("xx") {
            "2" => Ok(StatusFilter::Class(2)),
            "3" => Ok(StatusFilter::Class(3)),
            "4" => Ok(StatusFilter::Class(4)),
            "5" => Ok(StatusFilter::Class(5)),
            _ => Err(format!("unknown status filter '{s}'")),
        }
    }
}

/// Display-only row filter. Metrics are always computed over the unfiltered
/// window.
#[derive(Debug, Default, Clone)]
pub struct ViewFilter {
    pub status: StatusFilter,
    /// Case-insensitive substring of the path; empty matches everything.
    pub path: String,
}

impl ViewFilter {
    pub fn matches(&self, row: &StorageRow) -> bool {
        if let StatusFilter::Class(class) = self.status {
            if row.status_class() != class {
                return false;
            }
        }
        self.path.is_empty() || row.path.to_lowercase().contains(&self.path.to_lowercase())
    }

    pub fn apply<'a>(&self, rows: &'a [StorageRow]) -> Vec<&'a StorageRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

/// Everything the detail panel shows for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDetail {
    pub request_id: String,
    pub ts: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub ip: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub edge: Map<String, Value>,
}

impl RowDetail {
    pub fn from_row(row: &StorageRow) -> Self {
        let or_missing = |s: &str| {
            if s.is_empty() {
                MISSING.to_string()
            } else {
                s.to_string()
            }
        };
        Self {
            request_id: row.request_id.clone(),
            ts: timefmt::format(&row.ts),
            method: row.method.clone(),
            url: row.url.clone(),
            path: row.path.clone(),
            status: row.status,
            latency_ms: row.latency_ms,
            ip: or_missing(&row.ip),
            user_agent: or_missing(&row.user_agent),
            headers: row.headers(),
            edge: row.edge_metadata(),
        }
    }
}
