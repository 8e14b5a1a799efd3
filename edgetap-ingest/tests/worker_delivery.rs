//! End-to-end settlement behaviour of the ingest worker against the
//! in-process channel and store.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use edgetap_channel::{DeliveryChannel, MemoryQueue};
use edgetap_core::config::{ChannelConfig, IngestConfig};
use edgetap_core::event::{RequestSnapshot, ResponseSnapshot, Timing};
use edgetap_core::{Cursor, Page, RawEvent, StorageRow};
use edgetap_ingest::{IngestWorker, Settlement};
use edgetap_observability::MetricsCollector;
use edgetap_store::{LogStore, MemoryStore, StoreError};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn event(i: usize) -> RawEvent {
    let arrival = Utc.timestamp_millis_opt(1_739_176_200_000 + i as i64).unwrap();
    RawEvent {
        request: RequestSnapshot {
            id: format!("evt-{i:03}"),
            timestamp: arrival,
            method: "GET".into(),
            url: format!("https://example.com/items/{i}"),
            pathname: format!("/items/{i}"),
            search: String::new(),
            protocol: "https:".into(),
            headers: BTreeMap::from([("user-agent".to_string(), "test".to_string())]),
            body: None,
            body_truncated: false,
            cf: None,
        },
        response: ResponseSnapshot {
            status: 200,
            headers: BTreeMap::new(),
        },
        timing: Timing::new(arrival, Duration::from_millis(7)),
    }
}

fn channel_config(batch_size: usize, max_deliveries: u32) -> ChannelConfig {
    ChannelConfig {
        batch_size,
        batch_wait_ms: 20,
        max_deliveries,
        ..Default::default()
    }
}

fn ingest_config() -> IngestConfig {
    IngestConfig {
        workers: 1,
        error_backoff_ms: 1,
    }
}

/// Writes the first `partial` rows of its first call, then fails that call.
/// Later calls succeed.
struct FlakyStore {
    inner: MemoryStore,
    partial: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn insert_batch(&self, rows: &[StorageRow]) -> Result<usize, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.insert_batch(&rows[..self.partial]).await?;
            return Err(StoreError::Unavailable("connection reset mid-insert".into()));
        }
        self.inner.insert_batch(rows).await
    }

    async fn list(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, StoreError> {
        self.inner.list(limit, cursor).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_write_acks_the_whole_batch() {
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    let cfg = channel_config(5, 5);
    let queue = MemoryQueue::from_config(&cfg, Arc::clone(&metrics));
    let store = MemoryStore::new();
    for i in 0..5 {
        queue.send(event(i)).await.unwrap();
    }

    let worker = IngestWorker::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::clone(&metrics),
        &cfg,
        &ingest_config(),
    );
    let settled = worker.poll_once().await.unwrap();

    assert_eq!(settled, Some(Settlement::Acked { rows: 5 }));
    assert_eq!(store.len().await, 5);
    assert_eq!(queue.in_flight_len().await, 0);
    assert_eq!(queue.ready_len().await, 0);
    assert_eq!(metrics.ingest_rows_total.as_ref().unwrap().get(), 5);
}

#[tokio::test]
async fn idle_channel_yields_nothing() {
    let cfg = channel_config(5, 5);
    let queue = MemoryQueue::from_config(&cfg, Arc::new(MetricsCollector::disabled()));
    let worker = IngestWorker::new(
        Arc::new(queue),
        Arc::new(MemoryStore::new()),
        Arc::new(MetricsCollector::disabled()),
        &cfg,
        &ingest_config(),
    );
    assert_eq!(worker.poll_once().await.unwrap(), None);
}

// ── Failure and redelivery ───────────────────────────────────────────────────

#[tokio::test]
async fn partial_write_failure_is_not_acked_and_redelivery_fills_gaps() {
    let cfg = channel_config(10, 5);
    let queue = MemoryQueue::from_config(&cfg, Arc::new(MetricsCollector::disabled()));
    let memory = MemoryStore::new();
    let store = Arc::new(FlakyStore {
        inner: memory.clone(),
        partial: 4,
        calls: AtomicUsize::new(0),
    });
    for i in 0..10 {
        queue.send(event(i)).await.unwrap();
    }
    let worker = IngestWorker::new(
        Arc::new(queue.clone()),
        store,
        Arc::new(MetricsCollector::disabled()),
        &cfg,
        &ingest_config(),
    );

    let first = worker.poll_once().await.unwrap().unwrap();
    assert!(matches!(first, Settlement::Retried { messages: 10, .. }));
    assert_eq!(memory.len().await, 4);
    assert_eq!(queue.ready_len().await, 10, "nothing may be acknowledged");

    let second = worker.poll_once().await.unwrap().unwrap();
    assert_eq!(second, Settlement::Acked { rows: 10 });

    let expected: HashSet<String> = (0..10).map(|i| format!("evt-{i:03}")).collect();
    assert_eq!(memory.distinct_ids().await, expected);
    // Rows from the failed attempt stay; duplicates are expected.
    assert_eq!(memory.len().await, 14);
    assert_eq!(queue.in_flight_len().await, 0);
}

#[tokio::test]
async fn undecodable_batch_is_retried_then_dead_lettered() {
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    let cfg = channel_config(10, 2);
    let queue = MemoryQueue::from_config(&cfg, Arc::clone(&metrics));
    let store = MemoryStore::new();
    queue.send_raw(b"{\"request\":".to_vec()).await.unwrap();

    let worker = IngestWorker::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::clone(&metrics),
        &cfg,
        &ingest_config(),
    );

    for _ in 0..2 {
        let settled = worker.poll_once().await.unwrap().unwrap();
        assert!(matches!(settled, Settlement::Retried { messages: 1, .. }));
    }
    assert_eq!(worker.poll_once().await.unwrap(), None);

    assert!(store.is_empty().await);
    assert_eq!(queue.dead_letters().await.len(), 1);
    assert_eq!(metrics.dead_lettered_total.as_ref().unwrap().get(), 1);

    // The channel keeps flowing afterwards.
    queue.send(event(1)).await.unwrap();
    let settled = worker.poll_once().await.unwrap();
    assert_eq!(settled, Some(Settlement::Acked { rows: 1 }));
}

// ── Run loop ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn workers_drain_channel_and_stop_on_shutdown() {
    let cfg = channel_config(8, 5);
    let queue = MemoryQueue::from_config(&cfg, Arc::new(MetricsCollector::disabled()));
    let store = MemoryStore::new();
    for i in 0..50 {
        queue.send(event(i)).await.unwrap();
    }

    let worker = Arc::new(IngestWorker::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::new(MetricsCollector::disabled()),
        &cfg,
        &ingest_config(),
    ));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = edgetap_ingest::spawn_workers(worker, 3, rx);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.len().await < 50 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.distinct_ids().await.len(), 50);

    tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
