use async_trait::async_trait;
use edgetap_core::config::DashboardConfig;
use edgetap_core::{Cursor, Page};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to query service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("query service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid query service url '{0}'")]
    InvalidUrl(String),
}

/// Read side of the query endpoint as seen by the dashboard.
#[async_trait]
pub trait LogsClient: Send + Sync {
    async fn fetch_page(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, ClientError>;
}

/// `GET <api_url>?limit=N[&cursor=...]` over reqwest.
pub struct HttpLogsClient {
    client: reqwest::Client,
    api_url: reqwest::Url,
}

impl HttpLogsClient {
    pub fn new(config: &DashboardConfig) -> Result<Self, ClientError> {
        let api_url = reqwest::Url::parse(&config.api_url)
            .map_err(|_| ClientError::InvalidUrl(config.api_url.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(config.poll_timeout().max(Duration::from_millis(1)))
            .build()?;
        Ok(Self { client, api_url })
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_str()
    }
}

#[async_trait]
impl LogsClient for HttpLogsClient {
    async fn fetch_page(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, ClientError> {
        let mut url = self.api_url.clone();
        {
            let mut query = url.query_pairs_mut();
            let mut buf = itoa::Buffer::new();
            query.append_pair("limit", buf.format(limit));
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.encode());
            }
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<Page>().await?)
    }
}
