//! ClickHouse backend over the HTTP interface.
//!
//! Inserts are one `INSERT ... FORMAT JSONEachRow` request per batch.
//! Page reads bind the cursor and limit as query parameters and parse the
//! `FORMAT JSON` envelope.

use crate::error::StoreError;
use crate::schema::TableSchema;
use crate::LogStore;
use async_trait::async_trait;
use edgetap_core::config::ClickHouseConfig;
use edgetap_core::{timefmt, Cursor, Page, StorageRow};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Deserialize)]
struct JsonEnvelope {
    data: Vec<StorageRow>,
}

pub struct ClickHouseStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: Option<String>,
    schema: TableSchema,
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            schema: TableSchema::new(&config.database, &config.table)?,
        })
    }

    /// Connect and, when `create_table` is set, create the database and table.
    pub async fn connect(config: &ClickHouseConfig) -> Result<Self, StoreError> {
        let store = Self::new(config)?;
        if config.create_table {
            store.ensure_schema().await?;
        }
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.execute(self.schema.create_database()).await?;
        self.execute(self.schema.create_table()).await?;
        info!(table = %self.schema.qualified(), "ClickHouse schema ready");
        Ok(())
    }

    fn request(&self, params: &[(&str, String)]) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.endpoint)
            .query(params)
            .header("X-ClickHouse-User", &self.user);
        if let Some(ref password) = self.password {
            req = req.header("X-ClickHouse-Key", password);
        }
        req
    }

    async fn execute(&self, sql: String) -> Result<String, StoreError> {
        let resp = self.request(&[]).body(sql).send().await?;
        Self::check(resp).await
    }

    async fn check(resp: reqwest::Response) -> Result<String, StoreError> {
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            })
        }
    }
}

/// Line-delimited JSON body for `FORMAT JSONEachRow`.
pub fn encode_rows(rows: &[StorageRow]) -> Result<String, StoreError> {
    let mut body = String::with_capacity(rows.len() * 512);
    for row in rows {
        body.push_str(&serde_json::to_string(row)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl LogStore for ClickHouseStore {
    async fn insert_batch(&self, rows: &[StorageRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let body = encode_rows(rows)?;
        let params = [
            ("query", self.schema.insert()),
            ("date_time_input_format", "best_effort".to_string()),
        ];
        let resp = self.request(&params).body(body).send().await?;
        match Self::check(resp).await {
            Ok(_) => {
                debug!(rows = rows.len(), table = %self.schema.qualified(), "Inserted batch");
                Ok(rows.len())
            }
            Err(e) => {
                error!(error = %e, rows = rows.len(), "ClickHouse insert failed");
                Err(e)
            }
        }
    }

    async fn list(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, StoreError> {
        if limit == 0 {
            return Ok(Page::empty());
        }
        let mut params = vec![
            ("date_time_output_format", "iso".to_string()),
            ("param_limit", limit.to_string()),
        ];
        if let Some(c) = cursor {
            params.push(("param_cursor_ts", timefmt::format(&c.key().ts)));
            params.push(("param_cursor_id", c.key().request_id.clone()));
        }
        let sql = self.schema.select_page(cursor.is_some());
        let resp = self.request(&params).body(sql).send().await?;
        let body = Self::check(resp).await?;
        let envelope: JsonEnvelope =
            serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(Page::from_rows(envelope.data, limit))
    }

    fn backend(&self) -> &'static str {
        "clickhouse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_table_name_at_construction() {
        let config = ClickHouseConfig {
            table: "logs;--".into(),
            ..Default::default()
        };
        assert!(matches!(
            ClickHouseStore::new(&config),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn encode_rows_is_one_object_per_line() {
        let row: StorageRow = serde_json::from_value(serde_json::json!({
            "ts": "2025-02-10T08:30:00.125Z",
            "request_id": "r-1",
            "method": "GET",
            "url": "https://example.com/a",
            "path": "/a",
            "status": 200,
            "latency_ms": 12
        }))
        .unwrap();
        let body = encode_rows(&[row.clone(), row]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"ts\":\"2025-02-10T08:30:00.125Z\""));
    }
}
