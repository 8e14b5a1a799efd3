use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is full")]
    Full,

    #[error("channel is closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel backend error: {0}")]
    Backend(String),
}

impl ChannelError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Full | ChannelError::Backend(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ChannelError {
    fn from(e: redis::RedisError) -> Self {
        ChannelError::Backend(e.to_string())
    }
}
