use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),

    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to decode store response: {0}")]
    Decode(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}
