//! Client aggregation engine: polls the query service, merges pages into a
//! deduplicated buffer and derives rolling metrics from it.

pub mod buffer;
pub mod client;
pub mod metrics;
pub mod poller;
pub mod render;
pub mod state;
pub mod view;

pub use buffer::ClientLogBuffer;
pub use client::{ClientError, HttpLogsClient, LogsClient};
pub use metrics::{DerivedMetrics, PathMetrics, StatusHistogram};
pub use poller::Dashboard;
pub use render::{render, render_detail};
pub use state::{DashboardState, Event, Transition};
pub use view::{RowDetail, StatusFilter, ViewFilter};
