//! Durable, batched, at-least-once transport between the capture gateway
//! and the ingest worker.
//!
//! Producers call [`DeliveryChannel::send`]; consumers pull a [`Batch`] from
//! a [`BatchSource`], split it into messages and an [`AckHandle`], and settle
//! the handle once the batch has been persisted. Anything not acknowledged
//! is delivered again, so consumers must tolerate duplicates. Messages that
//! exhaust `max_deliveries` are diverted to a dead-letter destination.

pub mod batch;
pub mod error;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_stream;

pub use batch::{AckHandle, Acknowledger, Batch, Message};
pub use error::ChannelError;
pub use memory::MemoryQueue;

#[cfg(feature = "redis")]
pub use redis_stream::RedisStreamQueue;

use async_trait::async_trait;
use edgetap_core::RawEvent;
use std::time::Duration;

/// Producer side of the channel. Safe for concurrent use.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Enqueue an already-encoded message. Returns [`ChannelError::Full`]
    /// instead of waiting when the channel is saturated.
    async fn send_raw(&self, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Encode and enqueue one event. The event is consumed.
    async fn send(&self, event: RawEvent) -> Result<(), ChannelError> {
        let payload = event.to_message()?;
        self.send_raw(payload).await
    }
}

/// Consumer side of the channel.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Wait up to `max_wait` for up to `max_messages` messages.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Option<Batch>, ChannelError>;
}
