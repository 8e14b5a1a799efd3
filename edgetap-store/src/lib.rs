pub mod clickhouse;
pub mod error;
pub mod memory;
pub mod schema;

pub use clickhouse::ClickHouseStore;
pub use error::StoreError;
pub use memory::MemoryStore;

use async_trait::async_trait;
use edgetap_core::{Cursor, Page, StorageRow};

/// Append-only analytical store for request logs.
///
/// Writers only ever append; readers page over `(ts DESC, request_id DESC)`
/// and never coordinate with writers.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Write all rows in one bulk request. Returns the number of rows written.
    ///
    /// On error nothing can be assumed about how many rows landed.
    async fn insert_batch(&self, rows: &[StorageRow]) -> Result<usize, StoreError>;

    /// The `limit` newest rows strictly older than `cursor` (or the newest
    /// overall when `cursor` is `None`).
    async fn list(&self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, StoreError>;

    /// Short backend name for health output.
    fn backend(&self) -> &'static str;
}
