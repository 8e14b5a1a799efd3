use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use edgetap_core::EdgetapError;

/// Wraps [`EdgetapError`] so handlers can return it directly.
#[derive(Debug)]
pub struct ApiError(pub EdgetapError);

impl From<EdgetapError> for ApiError {
    fn from(e: EdgetapError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            self.0.to_json_body(),
        )
            .into_response()
    }
}
