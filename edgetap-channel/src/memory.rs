//! In-process channel backend.
//!
//! Bounded queue with lease-based delivery: a received message is leased
//! until it is acked, handed back with `retry`, or its lease runs out, in
//! which case it becomes ready again. Each delivery bumps the message's
//! delivery count; a message whose count has reached `max_deliveries` is
//! moved to the dead-letter list the next time it would be delivered.

use crate::batch::{Acknowledger, Batch, Message};
use crate::error::ChannelError;
use crate::{BatchSource, DeliveryChannel};
use async_trait::async_trait;
use edgetap_core::config::ChannelConfig;
use edgetap_observability::MetricsCollector;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A message that exhausted its deliveries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub deliveries: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    deliveries: u32,
    payload: Vec<u8>,
}

struct Lease {
    stored: Stored,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Stored>,
    in_flight: HashMap<String, Lease>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    max_deliveries: u32,
    visibility_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

/// Cloneable handle; all clones share one queue.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new(
        capacity: usize,
        max_deliveries: u32,
        visibility_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                max_deliveries: max_deliveries.max(1),
                visibility_timeout,
                metrics,
            }),
        }
    }

    pub fn from_config(config: &ChannelConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self::new(
            config.capacity,
            config.max_deliveries,
            config.visibility_timeout(),
            metrics,
        )
    }

    /// Messages waiting to be delivered.
    pub async fn ready_len(&self) -> usize {
        self.inner.state.lock().await.ready.len()
    }

    /// Messages delivered but not yet settled.
    pub async fn in_flight_len(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().await.dead_letters.clone()
    }

    /// Stop accepting sends; receivers get [`ChannelError::Closed`] once the
    /// ready queue is empty.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }
}

impl Inner {
    /// Return expired leases to the ready queue. Returns the earliest
    /// remaining expiry, if any.
    fn reclaim_expired(&self, state: &mut State, now: Instant) -> Option<Instant> {
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for delivery_id in expired {
            if let Some(lease) = state.in_flight.remove(&delivery_id) {
                warn!(
                    message_id = %lease.stored.id,
                    deliveries = lease.stored.deliveries,
                    "Lease expired without settlement, redelivering"
                );
                state.ready.push_back(lease.stored);
            }
        }
        state.in_flight.values().map(|lease| lease.expires_at).min()
    }

    fn lease(&self, state: &mut State, max_messages: usize, now: Instant) -> Vec<Message> {
        let mut messages = Vec::with_capacity(max_messages.min(state.ready.len()));
        let mut dead = 0usize;
        while messages.len() < max_messages {
            let Some(mut stored) = state.ready.pop_front() else {
                break;
            };
            if stored.deliveries >= self.max_deliveries {
                warn!(
                    message_id = %stored.id,
                    deliveries = stored.deliveries,
                    "Max deliveries reached, dead-lettering message"
                );
                state.dead_letters.push(DeadLetter {
                    message_id: stored.id,
                    deliveries: stored.deliveries,
                    payload: stored.payload,
                });
                dead += 1;
                continue;
            }
            stored.deliveries += 1;
            let delivery_id = format!("{}:{}", stored.id, stored.deliveries);
            messages.push(Message {
                delivery_id: delivery_id.clone(),
                attempts: stored.deliveries,
                payload: stored.payload.clone(),
            });
            state.in_flight.insert(
                delivery_id,
                Lease {
                    stored,
                    expires_at: now + self.visibility_timeout,
                },
            );
        }
        if dead > 0 {
            self.metrics.record_dead_letters(dead);
        }
        messages
    }
}

#[async_trait]
impl Acknowledger for Inner {
    async fn ack(&self, delivery_ids: &[String]) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        for id in delivery_ids {
            if state.in_flight.remove(id).is_none() {
                debug!(delivery_id = %id, "Ack for unknown or expired delivery");
            }
        }
        Ok(())
    }

    async fn retry(&self, delivery_ids: &[String]) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        for id in delivery_ids {
            match state.in_flight.remove(id) {
                Some(lease) => state.ready.push_back(lease.stored),
                None => debug!(delivery_id = %id, "Retry for unknown or expired delivery"),
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for MemoryQueue {
    async fn send_raw(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.ready.len() + state.in_flight.len() >= self.inner.capacity {
            return Err(ChannelError::Full);
        }
        state.ready.push_back(Stored {
            id: Uuid::new_v4().to_string(),
            deliveries: 0,
            payload,
        });
        drop(state);
        self.inner.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl BatchSource for MemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Option<Batch>, ChannelError> {
        let max_messages = max_messages.max(1);
        let deadline = Instant::now() + max_wait;

        loop {
            let wake_at = {
                let mut state = self.inner.state.lock().await;
                let now = Instant::now();
                let next_expiry = self.inner.reclaim_expired(&mut state, now);

                let timed_out = now >= deadline;
                if !state.ready.is_empty()
                    && (state.ready.len() >= max_messages || timed_out || state.closed)
                {
                    let messages = self.inner.lease(&mut state, max_messages, now);
                    if !messages.is_empty() {
                        let acker: Arc<dyn Acknowledger> = self.inner.clone();
                        return Ok(Some(Batch::new(messages, acker)));
                    }
                    // Everything taken was dead-lettered; go around again.
                    continue;
                }
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if timed_out {
                    return Ok(None);
                }
                next_expiry.map_or(deadline, |expiry| expiry.min(deadline))
            };

            let _ = tokio::time::timeout_at(wake_at, self.inner.notify.notified()).await;
        }
    }
}
