//! Redis Streams backend.
//!
//! Producers `XADD` to one stream; consumers read through a consumer group
//! so that every entry stays in the group's pending list until `XACK`.
//! Entries left pending longer than the visibility timeout are claimed
//! again (`XPENDING IDLE` + `XCLAIM`); once an entry has been delivered
//! `max_deliveries` times it is copied to `<stream>:dlq` and acknowledged.
//!
//! `XREADGROUP BLOCK` holds its connection for the whole wait, so blocking
//! reads never share a socket with producers or settlement. Each concurrent
//! reader checks a dedicated connection out of a small pool.

use crate::batch::{Acknowledger, Batch, Message};
use crate::error::ChannelError;
use crate::{BatchSource, DeliveryChannel};
use async_trait::async_trait;
use edgetap_core::config::ChannelConfig;
use edgetap_observability::MetricsCollector;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PAYLOAD_FIELD: &str = "payload";

struct Inner {
    client: redis::Client,
    /// Producer writes and settlement. Never issues blocking commands.
    conn: ConnectionManager,
    /// Idle connections reserved for `XREADGROUP BLOCK`.
    readers: Mutex<Vec<MultiplexedConnection>>,
    stream: String,
    dead_letter_stream: String,
    group: String,
    consumer: String,
    max_len: usize,
    max_deliveries: u32,
    visibility_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

#[derive(Clone)]
pub struct RedisStreamQueue {
    inner: Arc<Inner>,
}

impl RedisStreamQueue {
    /// Connect and make sure the stream and consumer group exist.
    pub async fn connect(
        config: &ChannelConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, ChannelError> {
        let redis_cfg = &config.redis;
        let client = redis::Client::open(redis_cfg.url.as_str())?;
        let mut conn = ConnectionManager::new(client.clone()).await?;

        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&redis_cfg.stream, &redis_cfg.group, "0")
            .await;
        match created {
            Ok(()) => info!(stream = %redis_cfg.stream, group = %redis_cfg.group, "Consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %redis_cfg.group, "Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                conn,
                readers: Mutex::new(Vec::new()),
                stream: redis_cfg.stream.clone(),
                dead_letter_stream: format!("{}:dlq", redis_cfg.stream),
                group: redis_cfg.group.clone(),
                consumer: redis_cfg.consumer.clone(),
                max_len: redis_cfg.max_len,
                max_deliveries: config.max_deliveries.max(1),
                visibility_timeout: config.visibility_timeout(),
                metrics,
            }),
        })
    }

    /// Name of the stream that receives exhausted entries.
    pub fn dead_letter_stream(&self) -> &str {
        &self.inner.dead_letter_stream
    }
}

// ── Reclaim decisions ────────────────────────────────────────────────────────

/// A pending entry whose lease has run out, as reported by `XPENDING`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StaleEntry {
    id: String,
    times_delivered: u32,
}

/// What `XCLAIM` handed back for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClaimedEntry {
    id: String,
    has_payload: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReclaimPlan {
    /// Entry id and the delivery count this redelivery represents.
    redeliver: Vec<(String, u32)>,
    /// Entry id and how many times it was delivered before giving up.
    dead_letter: Vec<(String, u32)>,
    /// Acknowledge without delivering: the entry has no readable payload.
    settle: Vec<String>,
}

/// Decide the fate of every claimed entry.
///
/// Stale ids that `XCLAIM` did not return were taken by another consumer in
/// the meantime or already dropped by the server; they are left alone.
fn plan_reclaim(stale: &[StaleEntry], claimed: &[ClaimedEntry], max_deliveries: u32) -> ReclaimPlan {
    let mut plan = ReclaimPlan::default();
    for entry in claimed {
        let prior = stale
            .iter()
            .find(|s| s.id == entry.id)
            .map(|s| s.times_delivered)
            .unwrap_or(0);
        if prior >= max_deliveries {
            plan.dead_letter.push((entry.id.clone(), prior));
        } else if entry.has_payload {
            plan.redeliver.push((entry.id.clone(), prior + 1));
        } else {
            plan.settle.push(entry.id.clone());
        }
    }
    plan
}

impl Inner {
    fn to_message(entry: &StreamId, attempts: u32) -> Option<Message> {
        let payload: Vec<u8> = entry.get(PAYLOAD_FIELD)?;
        Some(Message {
            delivery_id: entry.id.clone(),
            attempts,
            payload,
        })
    }

    /// Pending entries idle for at least the visibility timeout, oldest
    /// first. The IDLE filter runs server-side, so entries still under lease
    /// never crowd stale ones out of the page.
    async fn stale_entries(&self, max_messages: usize) -> Result<Vec<StaleEntry>, ChannelError> {
        let mut conn = self.conn.clone();
        let idle_ms = self.visibility_timeout.as_millis() as u64;
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(max_messages)
            .query_async(&mut conn)
            .await?;
        Ok(pending
            .ids
            .into_iter()
            .map(|p| StaleEntry {
                id: p.id,
                times_delivered: p.times_delivered as u32,
            })
            .collect())
    }

    /// Claim entries whose lease ran out. Exhausted ones are dead-lettered.
    async fn reclaim(&self, max_messages: usize) -> Result<Vec<Message>, ChannelError> {
        let stale = self.stale_entries(max_messages).await?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let idle_ms = self.visibility_timeout.as_millis() as usize;
        let ids: Vec<&str> = stale.iter().map(|s| s.id.as_str()).collect();
        let reply: StreamClaimReply = conn
            .xclaim(&self.stream, &self.group, &self.consumer, idle_ms, &ids)
            .await?;

        let claimed: Vec<ClaimedEntry> = reply
            .ids
            .iter()
            .map(|e| ClaimedEntry {
                id: e.id.clone(),
                has_payload: e.map.contains_key(PAYLOAD_FIELD),
            })
            .collect();
        let plan = plan_reclaim(&stale, &claimed, self.max_deliveries);

        let mut messages = Vec::with_capacity(plan.redeliver.len());
        for (id, attempts) in &plan.redeliver {
            if let Some(message) = reply
                .ids
                .iter()
                .find(|e| &e.id == id)
                .and_then(|e| Self::to_message(e, *attempts))
            {
                messages.push(message);
            }
        }

        let mut settled: Vec<String> = Vec::new();
        for (id, deliveries) in &plan.dead_letter {
            if let Some(entry) = reply.ids.iter().find(|e| &e.id == id) {
                self.dead_letter(&mut conn, entry, *deliveries).await?;
            }
            settled.push(id.clone());
        }
        for id in &plan.settle {
            warn!(entry_id = %id, "Stream entry has no payload, dropping");
            settled.push(id.clone());
        }
        if !settled.is_empty() {
            let _: usize = conn.xack(&self.stream, &self.group, &settled).await?;
        }
        Ok(messages)
    }

    async fn dead_letter(
        &self,
        conn: &mut ConnectionManager,
        entry: &StreamId,
        deliveries: u32,
    ) -> Result<(), ChannelError> {
        let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
        let deliveries = deliveries.to_string();
        let fields: [(&str, &[u8]); 3] = [
            (PAYLOAD_FIELD, payload.as_slice()),
            ("source_id", entry.id.as_bytes()),
            ("deliveries", deliveries.as_bytes()),
        ];
        let _: String = conn.xadd(&self.dead_letter_stream, "*", &fields).await?;
        warn!(
            entry_id = %entry.id,
            deliveries = %deliveries,
            dlq = %self.dead_letter_stream,
            "Max deliveries reached, dead-lettering message"
        );
        self.metrics.record_dead_letters(1);
        Ok(())
    }

    async fn checkout_reader(&self) -> Result<MultiplexedConnection, ChannelError> {
        if let Some(conn) = self.readers.lock().await.pop() {
            return Ok(conn);
        }
        debug!(stream = %self.stream, "Opening reader connection");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn read_new(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, ChannelError> {
        let mut conn = self.checkout_reader().await?;
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max_messages)
            .block(max_wait.as_millis().max(1) as usize);
        // A failed connection is dropped instead of returned to the pool.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &opts)
            .await?;
        self.readers.lock().await.push(conn);

        let mut messages = Vec::new();
        let mut unreadable = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in &key.ids {
                match Self::to_message(entry, 1) {
                    Some(message) => messages.push(message),
                    None => {
                        warn!(entry_id = %entry.id, "Stream entry has no payload, dropping");
                        unreadable.push(entry.id.clone());
                    }
                }
            }
        }
        if !unreadable.is_empty() {
            let mut conn = self.conn.clone();
            let _: usize = conn.xack(&self.stream, &self.group, &unreadable).await?;
        }
        Ok(messages)
    }
}

#[async_trait]
impl Acknowledger for Inner {
    async fn ack(&self, delivery_ids: &[String]) -> Result<(), ChannelError> {
        if delivery_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let acked: usize = conn.xack(&self.stream, &self.group, delivery_ids).await?;
        if acked < delivery_ids.len() {
            debug!(acked, requested = delivery_ids.len(), "Some entries were already settled");
        }
        Ok(())
    }

    async fn retry(&self, delivery_ids: &[String]) -> Result<(), ChannelError> {
        // Entries stay in the pending list; `reclaim` picks them up once the
        // visibility timeout has elapsed.
        debug!(
            count = delivery_ids.len(),
            after_secs = self.visibility_timeout.as_secs(),
            "Leaving entries pending for redelivery"
        );
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for RedisStreamQueue {
    async fn send_raw(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut conn = self.inner.conn.clone();
        let fields: [(&str, &[u8]); 1] = [(PAYLOAD_FIELD, payload.as_slice())];
        let _: String = conn
            .xadd_maxlen(
                &self.inner.stream,
                StreamMaxlen::Approx(self.inner.max_len),
                "*",
                &fields,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSource for RedisStreamQueue {
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Option<Batch>, ChannelError> {
        let max_messages = max_messages.max(1);
        let mut messages = self.inner.reclaim(max_messages).await?;
        if messages.len() < max_messages {
            // Do not block when redeliveries are already in hand.
            let wait = if messages.is_empty() { max_wait } else { Duration::from_millis(1) };
            messages.extend(self.inner.read_new(max_messages - messages.len(), wait).await?);
        }
        if messages.is_empty() {
            return Ok(None);
        }
        let acker: Arc<dyn Acknowledger> = self.inner.clone();
        Ok(Some(Batch::new(messages, acker)))
    }
}
