//! Origin forwarding over a pooled reqwest client.

use bytes::Bytes;
use edgetap_core::EdgetapError;
use edgetap_core::config::GatewayConfig;
use http::header::{HOST, HeaderName};
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy `headers` without hop-by-hop headers, anything the `Connection`
/// header names, `Host`, or `Content-Length` (the client recomputes it).
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let named_by_connection: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name)
            || *name == HOST
            || *name == http::header::CONTENT_LENGTH
            || named_by_connection.iter().any(|n| n == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Buffered origin response.
#[derive(Debug)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct OriginClient {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl OriginClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        // Responses go back to the caller untouched, so the client must
        // neither decompress bodies nor follow redirects.
        let client = reqwest::Client::builder()
            .timeout(config.origin_timeout())
            .no_gzip()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base: config.origin_url.trim_end_matches('/').to_string(),
            timeout: config.origin_timeout(),
        })
    }

    /// Origin base URL joined with the inbound path and query.
    pub fn target_url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base, path_and_query)
        } else {
            format!("{}/{}", self.base, path_and_query)
        }
    }

    pub async fn forward(
        &self,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<OriginResponse, EdgetapError> {
        let url = self.target_url(path_and_query);
        debug!(method = %method, url = %url, "Forwarding to origin");

        let resp = self
            .client
            .request(method.clone(), &url)
            .headers(forwardable_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        let mut response_headers = resp.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        if !declares_unsent_body(method, status) {
            // The server sets it again from the buffered body.
            response_headers.remove(http::header::CONTENT_LENGTH);
        }
        let body = resp.bytes().await.map_err(|e| self.classify(e))?;

        Ok(OriginResponse {
            status,
            headers: response_headers,
            body,
        })
    }

    fn classify(&self, e: reqwest::Error) -> EdgetapError {
        if e.is_timeout() {
            EdgetapError::OriginTimeout(self.timeout.as_millis() as u64)
        } else {
            EdgetapError::OriginUnavailable(e.to_string())
        }
    }
}

/// Drop hop-by-hop headers from an origin response.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

/// Responses that carry no body even though `Content-Length` may describe
/// one: replies to `HEAD`, and 1xx/204/304. The origin's value is passed on
/// for these.
pub fn declares_unsent_body(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}
