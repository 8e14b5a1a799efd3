//! Batch consumer: channel → transform → one bulk write → settle.
//!
//! A batch is acknowledged only after the store confirms the whole write.
//! Any failure (undecodable message, store error) hands the entire batch
//! back for redelivery, so rows that landed before a partial failure will
//! be written again. The channel's delivery cap bounds how often that can
//! happen for a batch that can never succeed.

use crate::transform::decode_rows;
use edgetap_channel::{Batch, BatchSource, ChannelError};
use edgetap_core::config::{ChannelConfig, IngestConfig};
use edgetap_observability::{BatchOutcome, MetricsCollector};
use edgetap_store::LogStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a consumed batch was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Written and acknowledged.
    Acked { rows: usize },
    /// Handed back for redelivery.
    Retried { messages: usize, reason: String },
}

pub struct IngestWorker {
    source: Arc<dyn BatchSource>,
    store: Arc<dyn LogStore>,
    metrics: Arc<MetricsCollector>,
    batch_size: usize,
    batch_wait: Duration,
    error_backoff: Duration,
}

impl IngestWorker {
    pub fn new(
        source: Arc<dyn BatchSource>,
        store: Arc<dyn LogStore>,
        metrics: Arc<MetricsCollector>,
        channel: &ChannelConfig,
        ingest: &IngestConfig,
    ) -> Self {
        Self {
            source,
            store,
            metrics,
            batch_size: channel.batch_size.max(1),
            batch_wait: channel.batch_wait(),
            error_backoff: Duration::from_millis(ingest.error_backoff_ms),
        }
    }

    /// Process one batch and settle it.
    ///
    /// Errors only when the settlement itself cannot reach the channel; the
    /// batch is then left to the channel's visibility timeout.
    pub async fn consume(&self, batch: Batch) -> Result<Settlement, ChannelError> {
        let (messages, ack) = batch.into_parts();
        let count = messages.len();

        let rows = match decode_rows(&messages) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, messages = count, "Undecodable message, retrying batch");
                ack.retry().await?;
                self.metrics.record_batch(BatchOutcome::Retried, 0);
                return Ok(Settlement::Retried {
                    messages: count,
                    reason: e.to_string(),
                });
            }
        };

        match self.store.insert_batch(&rows).await {
            Ok(written) => {
                ack.ack().await?;
                self.metrics.record_batch(BatchOutcome::Acked, written);
                debug!(rows = written, backend = self.store.backend(), "Batch persisted");
                Ok(Settlement::Acked { rows: written })
            }
            Err(e) => {
                error!(error = %e, messages = count, "Bulk write failed, batch left for redelivery");
                ack.retry().await?;
                self.metrics.record_batch(BatchOutcome::Retried, 0);
                Ok(Settlement::Retried {
                    messages: count,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Wait for one batch (up to the configured batch wait) and consume it.
    pub async fn poll_once(&self) -> Result<Option<Settlement>, ChannelError> {
        match self.source.receive(self.batch_size, self.batch_wait).await? {
            Some(batch) => self.consume(batch).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consume until `shutdown` flips to `true` or the channel closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.poll_once() => result,
            };
            match result {
                Ok(Some(Settlement::Retried { .. })) => {
                    tokio::time::sleep(self.error_backoff).await;
                }
                Ok(_) => {}
                Err(ChannelError::Closed) => {
                    info!("Channel closed, ingest worker stopping");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Channel error");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
        debug!("Ingest worker stopped");
    }
}

/// Start `count` workers sharing one [`IngestWorker`].
pub fn spawn_workers(
    worker: Arc<IngestWorker>,
    count: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let count = count.max(1);
    info!(workers = count, "Starting ingest workers");
    (0..count)
        .map(|_| {
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect()
}
