//! Remote node contract

use crate::common::{DirectoryEntry, PeerHandle, ProtocolMessage, Result, Snapshot};
use async_trait::async_trait;
use std::sync::Arc;

/// Calls a node can make on another node.
///
/// Errors follow one rule: [`crate::Error::Unreachable`] means the call never
/// completed and the peer should be treated as gone, anything else means the
/// peer answered and refused.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Handle this peer was reached through.
    fn handle(&self) -> &PeerHandle;

    /// Deliver a 2PC message, cohort side. An internal failure on the peer
    /// comes back as [`crate::Error::Abort`].
    async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage>;

    /// Full storage snapshot, used to seed a joining node.
    async fn get_storage(&self) -> Result<Snapshot>;

    async fn server_id(&self) -> Result<String>;

    /// Admit `id` into the peer's membership directory.
    async fn register_new_server(&self, id: &str, handle: &PeerHandle) -> Result<()>;

    /// The peer's membership directory, itself included.
    async fn directory(&self) -> Result<Vec<DirectoryEntry>>;
}

/// Resolves directory handles to callable peers.
pub trait Connector: Send + Sync {
    fn connect(&self, handle: &PeerHandle) -> Arc<dyn Peer>;
}
