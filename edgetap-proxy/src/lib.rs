//! Capture & proxy gateway.
//!
//! Every inbound request is snapshotted, forwarded unchanged to the origin,
//! and answered with the origin's response. The resulting [`RawEvent`] is
//! handed to the delivery channel on a background task, so telemetry can
//! neither delay nor fail the request.
//!
//! [`RawEvent`]: edgetap_core::RawEvent

pub mod capture;
pub mod emitter;
pub mod forward;
pub mod gateway;

pub use emitter::Emitter;
pub use forward::OriginClient;
pub use gateway::{GatewayState, build_gateway_router, serve};
