//! Request snapshotting. Everything here runs before the origin call and
//! only reads the inbound request.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use edgetap_core::event::{EdgeMetadata, RequestSnapshot};
use http::header::HOST;
use http::request::Parts;
use http::{HeaderMap, Version};
use std::collections::BTreeMap;

/// Edge headers that populate [`EdgeMetadata`].
const COUNTRY: &str = "cf-ipcountry";
const CITY: &str = "cf-ipcity";
const RAY: &str = "cf-ray";
const ASN: &str = "cf-asn";
const TLS_VERSION: &str = "cf-tls-version";
const TLS_CIPHER: &str = "cf-tls-cipher";

/// Lower-cased header map. Repeated headers are joined with `", "`;
/// values that are not valid UTF-8 are decoded lossily.
pub fn snapshot_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

/// Body snapshot bounded to `limit` bytes. Returns `(body, truncated)`;
/// an empty body is `None`.
pub fn snapshot_body(body: &Bytes, limit: usize) -> (Option<String>, bool) {
    if body.is_empty() {
        return (None, false);
    }
    let truncated = body.len() > limit;
    let slice = if truncated { &body[..limit] } else { &body[..] };
    (Some(String::from_utf8_lossy(slice).into_owned()), truncated)
}

/// Edge metadata from well-known edge headers, `None` when the request did
/// not pass through an edge that sets any of them.
pub fn edge_metadata(headers: &HeaderMap, version: Version) -> Option<EdgeMetadata> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let meta = EdgeMetadata {
        country: get(COUNTRY),
        city: get(CITY),
        // `cf-ray: 8f1c2d3e4a5b6c7d-FRA` ends with the edge node code.
        colo: get(RAY).and_then(|ray| ray.rsplit_once('-').map(|(_, colo)| colo.to_string())),
        asn: get(ASN).and_then(|asn| asn.parse().ok()),
        tls_version: get(TLS_VERSION),
        tls_cipher: get(TLS_CIPHER),
        http_protocol: None,
        extra: Default::default(),
    };
    if meta.is_empty() {
        return None;
    }
    Some(EdgeMetadata {
        http_protocol: Some(protocol(version).to_string()),
        ..meta
    })
}

pub fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

/// Scheme the client used: the absolute URI's, else `X-Forwarded-Proto`
/// from the edge, else `http`. Lower-case.
pub fn request_scheme(parts: &Parts) -> String {
    if let Some(scheme) = parts.uri.scheme_str() {
        return scheme.to_ascii_lowercase();
    }
    parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        // Chained proxies append; the first hop is the client's.
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| "http".to_string(), str::to_ascii_lowercase)
}

/// Absolute URL as the client addressed it.
pub fn request_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let scheme = request_scheme(parts);
    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{scheme}://{host}{path_and_query}")
}

/// Build the request half of the event.
pub fn snapshot_request(
    id: String,
    arrival: DateTime<Utc>,
    parts: &Parts,
    body: &Bytes,
    body_limit: usize,
) -> RequestSnapshot {
    let (body, body_truncated) = snapshot_body(body, body_limit);
    RequestSnapshot {
        id,
        timestamp: arrival,
        method: parts.method.as_str().to_string(),
        url: request_url(parts),
        pathname: parts.uri.path().to_string(),
        search: parts
            .uri
            .query()
            .filter(|q| !q.is_empty())
            .map(|q| format!("?{q}"))
            .unwrap_or_default(),
        // URL scheme with its colon, e.g. "https:". The HTTP version goes
        // to `cf.http_protocol`.
        protocol: format!("{}:", request_scheme(parts)),
        headers: snapshot_headers(&parts.headers),
        body,
        body_truncated,
        cf: edge_metadata(&parts.headers, parts.version),
    }
}
