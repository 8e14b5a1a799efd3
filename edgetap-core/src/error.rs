use crate::cursor::CursorError;
use thiserror::Error;

/// Unified error type for edgetap request paths.
#[derive(Error, Debug)]
pub enum EdgetapError {
    #[error("Origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("Origin timed out after {0} ms")]
    OriginTimeout(u64),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl EdgetapError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            EdgetapError::OriginUnavailable(_) => 502,
            EdgetapError::OriginTimeout(_) => 504,
            EdgetapError::InvalidQuery(_) => 400,
            EdgetapError::InvalidCursor(_) => 400,
            EdgetapError::StoreUnavailable(_) => 502,
            _ => 500,
        }
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "error": self.to_string(),
            "status": self.status_code(),
        })
        .to_string()
        .into_bytes()
    }
}
