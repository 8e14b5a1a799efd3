pub mod transform;
pub mod worker;

pub use transform::{decode_rows, to_row, DecodeError};
pub use worker::{spawn_workers, IngestWorker, Settlement};
