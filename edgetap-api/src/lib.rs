//! Query service: bounded, keyset-paginated reads over the request log.
//!
//! Stateless; every request is a single range read against the store.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{ApiState, build_api_router, cors_layer, serve};
