use crate::error::ChannelError;
use async_trait::async_trait;
use std::sync::Arc;

/// One delivered message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Backend-specific delivery id, used to settle the message.
    pub delivery_id: String,
    /// How many times this message has been delivered, including this one.
    pub attempts: u32,
    pub payload: Vec<u8>,
}

/// Settles deliveries on the backend that produced them.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark deliveries as done; they will not be delivered again.
    async fn ack(&self, delivery_ids: &[String]) -> Result<(), ChannelError>;

    /// Give deliveries back for redelivery.
    async fn retry(&self, delivery_ids: &[String]) -> Result<(), ChannelError>;
}

/// A batch as handed to a consumer.
pub struct Batch {
    messages: Vec<Message>,
    acker: Arc<dyn Acknowledger>,
}

impl Batch {
    pub fn new(messages: Vec<Message>, acker: Arc<dyn Acknowledger>) -> Self {
        Self { messages, acker }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Separate the payloads from the settlement handle so that decoding
    /// and transformation never touch delivery state.
    pub fn into_parts(self) -> (Vec<Message>, AckHandle) {
        let delivery_ids = self.messages.iter().map(|m| m.delivery_id.clone()).collect();
        (
            self.messages,
            AckHandle {
                delivery_ids,
                acker: self.acker,
            },
        )
    }
}

/// All-or-nothing settlement for one batch.
///
/// Consumed by either [`AckHandle::ack`] or [`AckHandle::retry`]; dropping
/// it unsettled leaves the batch to the backend's visibility timeout.
pub struct AckHandle {
    delivery_ids: Vec<String>,
    acker: Arc<dyn Acknowledger>,
}

impl AckHandle {
    pub fn len(&self) -> usize {
        self.delivery_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivery_ids.is_empty()
    }

    pub async fn ack(self) -> Result<usize, ChannelError> {
        self.acker.ack(&self.delivery_ids).await?;
        Ok(self.delivery_ids.len())
    }

    pub async fn retry(self) -> Result<usize, ChannelError> {
        self.acker.retry(&self.delivery_ids).await?;
        Ok(self.delivery_ids.len())
    }
}
