//! Point-to-point request/response transport between nodes
//!
//! - `HttpPeer` / `HttpConnector`: production transport over the axum surface
//! - `LocalNetwork`: in-process transport for embedding and tests

pub mod http_client;
pub mod local;
pub mod peer;

pub use http_client::{HttpConnector, HttpPeer};
pub use local::LocalNetwork;
pub use peer::{Connector, Peer};
