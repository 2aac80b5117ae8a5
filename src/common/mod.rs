//! Common utilities and types shared across replikv

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, DiscoveryConfig, NodeConfig};
pub use error::{Error, Result};
pub use protocol::{
    DirectoryEntry, Operation, Phase, PeerHandle, ProtocolMessage, RegisterRequest, Response,
    Snapshot, Transaction,
};
pub use utils::{encode_key, local_ip, parse_seed, server_id};
