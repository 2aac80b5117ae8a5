//! Membership directory and the per-transaction cohort view
//!
//! Each node keeps its own directory (itself included). Nodes join by copying
//! storage from a seed's peers and exchanging handles with every one of them.
//! A peer whose transport fails during a transaction is demoted, i.e. removed
//! from the local directory, until it registers again.

use crate::common::{DirectoryEntry, Error, PeerHandle, Result, Snapshot};
use crate::transport::{Connector, Peer};
use std::sync::{Arc, RwLock};

/// Name → handle registry. Listing order is registration order.
pub trait Directory: Send + Sync {
    /// Fails with [`Error::AlreadyRegistered`] on a name collision.
    fn register(&self, name: &str, handle: PeerHandle) -> Result<()>;

    fn unregister(&self, name: &str) -> Result<()>;

    fn lookup(&self, name: &str) -> Result<PeerHandle>;

    fn list(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<Vec<DirectoryEntry>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for InMemoryDirectory {
    fn register(&self, name: &str, handle: PeerHandle) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|e| e.id == name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        entries.push(DirectoryEntry {
            id: name.to_string(),
            handle,
        });
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.id != name);
        if entries.len() == before {
            return Err(Error::NotRegistered(name.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<PeerHandle> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.id == name)
            .map(|e| e.handle.clone())
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.id.clone())
            .collect())
    }
}

/// A peer taking part in one transaction.
#[derive(Clone)]
pub struct Cohort {
    pub id: String,
    pub peer: Arc<dyn Peer>,
}

impl std::fmt::Debug for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cohort")
            .field("id", &self.id)
            .field("handle", self.peer.handle())
            .finish()
    }
}

/// Receives the storage copied from the cluster during a join.
pub trait SnapshotSink: Send {
    fn install(&mut self, snapshot: Snapshot) -> Result<()>;
}

pub struct MembershipView {
    self_id: String,
    self_handle: PeerHandle,
    directory: Arc<dyn Directory>,
    connector: Arc<dyn Connector>,
    /// Read the cohort list from this node's directory instead of ours
    master: Option<PeerHandle>,
}

impl MembershipView {
    /// Create the view and register ourselves in `directory`.
    pub fn new(
        self_id: impl Into<String>,
        self_handle: PeerHandle,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let self_id = self_id.into();
        directory.register(&self_id, self_handle.clone())?;
        Ok(Self {
            self_id,
            self_handle,
            directory,
            connector,
            master: None,
        })
    }

    pub fn with_master(mut self, master: Option<PeerHandle>) -> Self {
        self.master = master;
        self
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Register a reachable peer under a unique name.
    pub fn admit(&self, peer_id: &str, handle: PeerHandle) -> Result<()> {
        self.directory.register(peer_id, handle.clone())?;
        tracing::info!("Registered new server: {} ({})", peer_id, handle);
        Ok(())
    }

    /// Drop a peer that stopped answering.
    pub fn demote(&self, peer_id: &str) {
        match self.directory.unregister(peer_id) {
            Ok(()) => tracing::info!("Removed unreachable server {} from directory", peer_id),
            Err(e) => tracing::debug!("Demote {}: {}", peer_id, e),
        }
    }

    /// Local directory contents, ourselves included.
    pub fn entries(&self) -> Result<Vec<DirectoryEntry>> {
        self.directory
            .list()?
            .into_iter()
            .map(|id| {
                let handle = self.directory.lookup(&id)?;
                Ok(DirectoryEntry { id, handle })
            })
            .collect()
    }

    /// Every registered peer except ourselves, in directory order. Fetched
    /// fresh for each transaction. Failing to read the directory is fatal.
    pub async fn list_cohorts(&self) -> Result<Vec<Cohort>> {
        tracing::debug!("Fetching other cohorts/participants");
        let entries = match &self.master {
            None => self.entries().map_err(Error::into_fatal)?,
            Some(master) => self
                .connector
                .connect(master)
                .directory()
                .await
                .map_err(|e| Error::Fatal(format!("Failed to identify other servers: {}", e)))?,
        };

        Ok(entries
            .into_iter()
            .filter(|e| e.id != self.self_id)
            .map(|e| Cohort {
                peer: self.connector.connect(&e.handle),
                id: e.id,
            })
            .collect())
    }

    /// Join the cluster reachable through the first working seed.
    ///
    /// Storage is copied from the first peer found there, then handles are
    /// exchanged with every peer in the seed's directory. Returns `false` when
    /// no seed yields a usable peer, which means running standalone.
    pub async fn discover_cluster(
        &self,
        seeds: &[PeerHandle],
        sink: &mut dyn SnapshotSink,
    ) -> bool {
        tracing::info!("Trying to connect to a cluster");
        for seed in seeds {
            if *seed == self.self_handle {
                continue;
            }
            match self.join_through(seed, sink).await {
                Ok(true) => {
                    tracing::info!("Connected to a cluster through {}", seed);
                    return true;
                }
                Ok(false) => tracing::info!("Seed {} has no other servers", seed),
                Err(e) => tracing::warn!("Seed {} unusable: {}", seed, e),
            }
        }
        tracing::info!("Could not connect to any cluster, acting as a standalone cluster");
        false
    }

    async fn join_through(
        &self,
        seed: &PeerHandle,
        sink: &mut dyn SnapshotSink,
    ) -> Result<bool> {
        let entries = self.connector.connect(seed).directory().await?;
        let mut synced = false;
        let mut joined = false;

        for entry in entries {
            if entry.id == self.self_id {
                continue;
            }
            let peer = self.connector.connect(&entry.handle);

            if !synced {
                match peer.get_storage().await {
                    Ok(snapshot) => {
                        tracing::info!(
                            "Copied {} entries from server {}",
                            snapshot.len(),
                            entry.id
                        );
                        sink.install(snapshot)?;
                        synced = true;
                    }
                    Err(e) => {
                        tracing::warn!("Cannot copy storage from {}: {}", entry.id, e);
                        continue;
                    }
                }
            }

            match peer
                .register_new_server(&self.self_id, &self.self_handle)
                .await
            {
                Ok(()) | Err(Error::AlreadyRegistered(_)) => {
                    tracing::info!("Registered current server with server: {}", entry.id)
                }
                Err(e) => {
                    tracing::warn!("Cannot register with {}: {}", entry.id, e);
                    continue;
                }
            }

            match self.admit(&entry.id, entry.handle.clone()) {
                Ok(()) | Err(Error::AlreadyRegistered(_)) => joined = true,
                Err(e) => return Err(e),
            }
        }

        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalNetwork;

    fn view(id: &str) -> MembershipView {
        MembershipView::new(
            id,
            PeerHandle::new(format!("local://{}", id)),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(LocalNetwork::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_directory_rejects_duplicates() {
        let dir = InMemoryDirectory::new();
        dir.register("a", PeerHandle::new("local://a")).unwrap();
        dir.register("b", PeerHandle::new("local://b")).unwrap();
        assert!(matches!(
            dir.register("a", PeerHandle::new("local://other")),
            Err(Error::AlreadyRegistered(_))
        ));
        assert_eq!(dir.list().unwrap(), vec!["a", "b"]);
        assert_eq!(dir.lookup("a").unwrap(), PeerHandle::new("local://a"));
        assert!(matches!(dir.lookup("zz"), Err(Error::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_cohorts_exclude_self_and_keep_order() {
        let view = view("me");
        view.admit("b", PeerHandle::new("local://b")).unwrap();
        view.admit("a", PeerHandle::new("local://a")).unwrap();

        let ids: Vec<String> = view
            .list_cohorts()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(view.entries().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_demote_until_readmitted() {
        let view = view("me");
        view.admit("b", PeerHandle::new("local://b")).unwrap();
        view.demote("b");
        assert!(view.list_cohorts().await.unwrap().is_empty());

        // Demoting twice is harmless
        view.demote("b");

        view.admit("b", PeerHandle::new("local://b")).unwrap();
        assert_eq!(view.list_cohorts().await.unwrap().len(), 1);
    }

    #[test]
    fn test_admit_duplicate_is_an_error() {
        let view = view("me");
        assert!(matches!(
            view.admit("me", PeerHandle::new("local://elsewhere")),
            Err(Error::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_master_is_fatal() {
        let view = view("me").with_master(Some(PeerHandle::new("local://master")));
        let err = view.list_cohorts().await.unwrap_err();
        assert!(err.is_fatal());
    }

    struct Discard;

    impl SnapshotSink for Discard {
        fn install(&mut self, _snapshot: Snapshot) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_no_reachable_seed_means_standalone() {
        let view = view("me");
        let seeds = vec![
            PeerHandle::new("local://gone-1"),
            PeerHandle::new("local://gone-2"),
        ];
        assert!(!view.discover_cluster(&seeds, &mut Discard).await);
        assert!(view.list_cohorts().await.unwrap().is_empty());
    }
}
