//! In-process network of replicas
//!
//! Lets a whole cluster run inside one process with no sockets, and lets
//! callers cut a node off to exercise the unreachable-peer paths.

use crate::common::{DirectoryEntry, Error, PeerHandle, ProtocolMessage, Result, Snapshot};
use crate::replica::Replica;
use crate::transport::{Connector, Peer};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

#[derive(Clone, Default)]
pub struct LocalNetwork {
    nodes: Arc<RwLock<HashMap<PeerHandle, Weak<Replica>>>>,
    partitioned: Arc<RwLock<HashSet<PeerHandle>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `replica` reachable under its own handle.
    pub fn attach(&self, replica: &Arc<Replica>) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(replica.handle().clone(), Arc::downgrade(replica));
    }

    /// Remove a node, as if its process died.
    pub fn detach(&self, handle: &PeerHandle) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle);
    }

    /// Cut a node off (`false`) or heal it (`true`).
    pub fn set_reachable(&self, handle: &PeerHandle, reachable: bool) {
        let mut partitioned = self.partitioned.write().unwrap_or_else(|e| e.into_inner());
        if reachable {
            partitioned.remove(handle);
        } else {
            partitioned.insert(handle.clone());
        }
    }

    fn resolve(&self, handle: &PeerHandle) -> Result<Arc<Replica>> {
        let unreachable = |reason: &str| Error::Unreachable {
            node: handle.to_string(),
            reason: reason.to_string(),
        };

        if self
            .partitioned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(handle)
        {
            return Err(unreachable("partitioned"));
        }
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .and_then(Weak::upgrade)
            .ok_or_else(|| unreachable("no such node"))
    }
}

impl Connector for LocalNetwork {
    fn connect(&self, handle: &PeerHandle) -> Arc<dyn Peer> {
        Arc::new(LocalPeer {
            handle: handle.clone(),
            network: self.clone(),
        })
    }
}

struct LocalPeer {
    handle: PeerHandle,
    network: LocalNetwork,
}

#[async_trait]
impl Peer for LocalPeer {
    fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage> {
        self.network.resolve(&self.handle)?.send(message).await
    }

    async fn get_storage(&self) -> Result<Snapshot> {
        Ok(self.network.resolve(&self.handle)?.storage().await)
    }

    async fn server_id(&self) -> Result<String> {
        Ok(self.network.resolve(&self.handle)?.server_id().to_string())
    }

    async fn register_new_server(&self, id: &str, handle: &PeerHandle) -> Result<()> {
        self.network
            .resolve(&self.handle)?
            .register_new_server(id, handle.clone())
    }

    async fn directory(&self) -> Result<Vec<DirectoryEntry>> {
        self.network.resolve(&self.handle)?.directory_entries()
    }
}
