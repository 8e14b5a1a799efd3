use crate::error::StoreError;
use crate::LogStore;
use async_trait::async_trait;
use edgetap_core::{Cursor, Page, RowKey, StorageRow};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Rows {
    /// Keyed by (row key, insertion sequence) so duplicate keys coexist.
    by_key: BTreeMap<(RowKey, u64), StorageRow>,
    next_seq: u64,
}

/// In-process append-only store.
///
/// Keeps every inserted row, duplicates included, ordered by
/// `(ts, request_id)`. Cloning shares the underlying rows.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<RwLock<Rows>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored rows, duplicates included.
    pub async fn len(&self) -> usize {
        self.rows.read().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Distinct `request_id`s present.
    pub async fn distinct_ids(&self) -> HashSet<String> {
        self.rows
            .read()
            .await
            .by_key
            .values()
            .map(|row| row.request_id.clone())
            .collect()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_batch(&self, rows: &[StorageRow]) -> Result<usize, StoreError> {
        let mut guard = self.rows.write().await;
        for row in rows {
            let seq = guard.next_seq;
            guard.next_seq += 1;
            guard.by_key.insert((row.key(), seq), row.clone());
        }
        debug!(rows = rows.len(), total = guard.by_key.len(), "Appended rows");
        Ok(rows.len())
    }

    async fn list(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, StoreError> {
        let guard = self.rows.read().await;
        // (key, 0) is the first entry with that key, so an excluded upper
        // bound there keeps exactly the rows strictly below the cursor.
        let upper = match cursor {
            Some(c) => Bound::Excluded((c.key().clone(), 0)),
            None => Bound::Unbounded,
        };
        let data: Vec<StorageRow> = guard
            .by_key
            .range((Bound::Unbounded, upper))
            .rev()
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect();
        Ok(Page::from_rows(data, limit))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
