pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod page;
pub mod row;
pub mod timefmt;

pub use config::EdgetapConfig;
pub use cursor::{Cursor, RowKey};
pub use error::EdgetapError;
pub use event::RawEvent;
pub use page::Page;
pub use row::StorageRow;
