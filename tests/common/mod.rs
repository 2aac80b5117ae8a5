//! In-process cluster harness shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use replikv::common::{DirectoryEntry, Phase, PeerHandle, ProtocolMessage, Result, Snapshot};
use replikv::replica::{MemoryRecoveryLog, RecoveryLog, Replica, ReplicaOptions, Shutdown};
use replikv::transport::{Connector, LocalNetwork, Peer};
use std::sync::Arc;
use std::time::Duration;

pub fn handle(name: &str) -> PeerHandle {
    PeerHandle::new(format!("local://{}", name))
}

pub struct Cluster {
    pub network: LocalNetwork,
    pub shutdown: Shutdown,
    seeds: Vec<PeerHandle>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            network: LocalNetwork::new(),
            shutdown: Shutdown::new(),
            seeds: Vec::new(),
        }
    }

    /// Start a node backed by a fresh in-memory log and join it through the
    /// nodes started before it.
    pub async fn spawn(&mut self, name: &str) -> (Arc<Replica>, Arc<MemoryRecoveryLog>) {
        let log = Arc::new(MemoryRecoveryLog::new());
        let replica = self.spawn_with_log(name, log.clone()).await;
        (replica, log)
    }

    pub async fn spawn_with_log(&mut self, name: &str, log: Arc<dyn RecoveryLog>) -> Arc<Replica> {
        let connector = Arc::new(self.network.clone());
        self.start(name, log, connector).await
    }

    /// Like [`Cluster::spawn`], but the node reaches its peers through
    /// `connector`.
    pub async fn spawn_with_connector(
        &mut self,
        name: &str,
        connector: Arc<dyn Connector>,
    ) -> Arc<Replica> {
        self.start(name, Arc::new(MemoryRecoveryLog::new()), connector)
            .await
    }

    async fn start(
        &mut self,
        name: &str,
        log: Arc<dyn RecoveryLog>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Replica> {
        let options = ReplicaOptions {
            retry_delay: Duration::from_millis(10),
            master: None,
        };
        let replica = Arc::new(
            Replica::open(
                name,
                handle(name),
                log,
                connector,
                options,
                self.shutdown.subscribe(),
            )
            .unwrap(),
        );
        self.network.attach(&replica);

        let joined = replica.discover_cluster(&self.seeds).await;
        assert_eq!(joined, !self.seeds.is_empty());
        self.seeds.push(handle(name));
        replica
    }
}

pub async fn value(replica: &Replica, key: &str) -> Option<String> {
    replica.get(key).await.value
}

/// Connects through the network, but partitions `target` as soon as it has
/// voted on a transaction, so the decision that follows cannot reach it.
pub struct CutAfterVote {
    pub network: LocalNetwork,
    pub target: PeerHandle,
}

impl Connector for CutAfterVote {
    fn connect(&self, handle: &PeerHandle) -> Arc<dyn Peer> {
        let inner = self.network.connect(handle);
        if *handle != self.target {
            return inner;
        }
        Arc::new(CutAfterVotePeer {
            inner,
            network: self.network.clone(),
        })
    }
}

struct CutAfterVotePeer {
    inner: Arc<dyn Peer>,
    network: LocalNetwork,
}

#[async_trait]
impl Peer for CutAfterVotePeer {
    fn handle(&self) -> &PeerHandle {
        self.inner.handle()
    }

    async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage> {
        let voting = message.phase == Phase::QueryToCommit;
        let reply = self.inner.send(message).await;
        if voting {
            self.network.set_reachable(self.inner.handle(), false);
        }
        reply
    }

    async fn get_storage(&self) -> Result<Snapshot> {
        self.inner.get_storage().await
    }

    async fn server_id(&self) -> Result<String> {
        self.inner.server_id().await
    }

    async fn register_new_server(&self, id: &str, handle: &PeerHandle) -> Result<()> {
        self.inner.register_new_server(id, handle).await
    }

    async fn directory(&self) -> Result<Vec<DirectoryEntry>> {
        self.inner.directory().await
    }
}
