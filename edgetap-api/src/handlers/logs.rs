use crate::error::ApiError;
use crate::server::ApiState;
use axum::extract::{Query, State};
use axum::response::Json;
use edgetap_core::{Cursor, EdgetapError, Page};
use edgetap_observability::QueryOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// `GET /logs?limit=<n>&cursor=<ts>|<request_id>`
pub async fn list_logs(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Page>, ApiError> {
    let (limit, cursor) = match parse_params(&params, state.default_limit, state.max_limit) {
        Ok(parsed) => parsed,
        Err(e) => {
            state.metrics.record_query(QueryOutcome::BadRequest);
            return Err(e.into());
        }
    };

    match state.store.list(limit, cursor.as_ref()).await {
        Ok(page) => {
            state.metrics.record_query(QueryOutcome::Ok);
            debug!(limit, rows = page.len(), more = page.next_cursor.is_some(), "Served page");
            Ok(Json(page))
        }
        Err(e) => {
            error!(error = %e, backend = state.store.backend(), "Log query failed");
            state.metrics.record_query(QueryOutcome::StoreError);
            Err(EdgetapError::StoreUnavailable(e.to_string()).into())
        }
    }
}

/// Resolve `limit` (default when absent, clamped to `max_limit`) and the
/// optional cursor. An empty `cursor` means first page.
pub fn parse_params(
    params: &HashMap<String, String>,
    default_limit: usize,
    max_limit: usize,
) -> Result<(usize, Option<Cursor>), EdgetapError> {
    let limit = match params.get("limit").map(|s| s.trim()) {
        None | Some("") => default_limit,
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => {
                return Err(EdgetapError::InvalidQuery(format!(
                    "limit must be a positive integer, got {raw:?}"
                )));
            }
            Ok(n) => n,
        },
    };

    let cursor = match params.get("cursor").map(|s| s.trim()) {
        None | Some("") => None,
        Some(raw) => Some(Cursor::decode(raw)?),
    };

    Ok((limit.min(max_limit), cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_absent() {
        let (limit, cursor) = parse_params(&params(&[]), 10, 500).unwrap();
        assert_eq!(limit, 10);
        assert!(cursor.is_none());
    }

    #[test]
    fn oversize_limit_is_clamped() {
        let (limit, _) = parse_params(&params(&[("limit", "100000")]), 10, 500).unwrap();
        assert_eq!(limit, 500);
    }

    #[test]
    fn non_positive_or_garbage_limit_is_rejected() {
        for bad in ["0", "-3", "ten", "1.5"] {
            let err = parse_params(&params(&[("limit", bad)]), 10, 500).unwrap_err();
            assert_eq!(err.status_code(), 400, "limit={bad}");
        }
    }

    #[test]
    fn cursor_is_decoded() {
        let (_, cursor) = parse_params(
            &params(&[("cursor", "2025-02-10T08:30:00.125Z|r-1")]),
            10,
            500,
        )
        .unwrap();
        assert_eq!(cursor.unwrap().key().request_id, "r-1");
    }

    #[test]
    fn malformed_cursor_is_rejected() {
        let err = parse_params(&params(&[("cursor", "no-separator")]), 10, 500).unwrap_err();
        assert!(matches!(err, EdgetapError::InvalidCursor(_)));
    }
}
