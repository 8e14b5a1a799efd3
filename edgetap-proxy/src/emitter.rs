//! Fire-and-forget hand-off of events to the delivery channel.

use edgetap_channel::DeliveryChannel;
use edgetap_core::RawEvent;
use edgetap_core::config::EmitPolicy;
use edgetap_observability::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Sends events off the request path with a bounded retry-or-drop policy.
///
/// A send that the channel rejects with a transient error (full, backend
/// hiccup) is retried up to `max_attempts` times with linear backoff; after
/// that, or on a permanent error, the event is dropped and counted.
#[derive(Clone)]
pub struct Emitter {
    channel: Arc<dyn DeliveryChannel>,
    max_attempts: u32,
    backoff: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Emitter {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        policy: &EmitPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            channel,
            max_attempts: policy.max_attempts.max(1),
            backoff: Duration::from_millis(policy.backoff_ms),
            metrics,
        }
    }

    /// Spawn delivery in the background; the caller never waits on it.
    pub fn emit(&self, event: RawEvent) -> JoinHandle<bool> {
        let emitter = self.clone();
        tokio::spawn(async move { emitter.deliver(event).await })
    }

    /// Deliver one event. Returns whether the channel accepted it.
    pub async fn deliver(&self, event: RawEvent) -> bool {
        let event_id = event.request.id.clone();
        let payload = match event.to_message() {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to encode event, dropping");
                self.metrics.record_dropped();
                return false;
            }
        };

        let mut attempt = 1;
        loop {
            match self.channel.send_raw(payload.clone()).await {
                Ok(()) => {
                    debug!(event_id = %event_id, attempt, "Event queued");
                    self.metrics.record_captured();
                    return true;
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(event_id = %event_id, attempt, error = %e, "Channel busy, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %event_id,
                        attempts = attempt,
                        error = %e,
                        "Dropping telemetry event"
                    );
                    self.metrics.record_dropped();
                    return false;
                }
            }
        }
    }
}
