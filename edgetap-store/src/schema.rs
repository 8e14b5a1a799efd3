//! SQL for the ClickHouse request-log table.
//!
//! Table layout:
//! ```text
//! <database>.<table>
//!   ts DateTime64(3, 'UTC'), request_id String, method, url, path,
//!   status UInt16, latency_ms UInt32, country, city, colo, user_agent, ip,
//!   headers_json String, cf_json String
//! ENGINE = ReplacingMergeTree ORDER BY (ts, request_id)
//! ```
//!
//! `ReplacingMergeTree` collapses rows that share `(ts, request_id)` during
//! background merges, so redelivered batches eventually dedup in storage.
//! Merges are asynchronous; readers must still treat `request_id` as the
//! dedup key.

use crate::error::StoreError;

pub const COLUMNS: &str = "ts, request_id, method, url, path, status, latency_ms, \
     country, city, colo, user_agent, ip, headers_json, cf_json";

/// Validated `<database>.<table>` pair.
#[derive(Debug, Clone)]
pub struct TableSchema {
    database: String,
    table: String,
}

impl TableSchema {
    pub fn new(database: &str, table: &str) -> Result<Self, StoreError> {
        Ok(Self {
            database: identifier(database)?,
            table: identifier(table)?,
        })
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    pub fn create_database(&self) -> String {
        format!("CREATE DATABASE IF NOT EXISTS {}", self.database)
    }

    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             ts DateTime64(3, 'UTC'), \
             request_id String, \
             method LowCardinality(String), \
             url String, \
             path String, \
             status UInt16, \
             latency_ms UInt32, \
             country LowCardinality(String), \
             city String, \
             colo LowCardinality(String), \
             user_agent String, \
             ip String, \
             headers_json String, \
             cf_json String\
             ) ENGINE = ReplacingMergeTree ORDER BY (ts, request_id)",
            self.qualified()
        )
    }

    /// Bulk insert statement; the rows follow as line-delimited JSON.
    pub fn insert(&self) -> String {
        format!("INSERT INTO {} FORMAT JSONEachRow", self.qualified())
    }

    /// Page query. Cursor values and limit travel as bound parameters
    /// (`param_cursor_ts`, `param_cursor_id`, `param_limit`), never inline.
    pub fn select_page(&self, with_cursor: bool) -> String {
        let filter = if with_cursor {
            "WHERE (ts, request_id) < \
             (parseDateTime64BestEffort({cursor_ts:String}, 3, 'UTC'), {cursor_id:String}) "
        } else {
            ""
        };
        format!(
            "SELECT {COLUMNS} FROM {} {filter}\
             ORDER BY ts DESC, request_id DESC LIMIT {{limit:UInt32}} FORMAT JSON",
            self.qualified()
        )
    }
}

/// Accept plain `[A-Za-z_][A-Za-z0-9_]*` identifiers only.
fn identifier(name: &str) -> Result<String, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(name.to_string())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
