//! A replica node: client operations, cohort entry point and membership calls
//!
//! One async lock guards the whole node state. A coordinated write holds it
//! for the full two-phase run, so a node never serves a client write and a
//! peer's protocol message at the same time.

use crate::common::{
    DirectoryEntry, Error, PeerHandle, ProtocolMessage, Response, Result, Snapshot, Transaction,
};
use crate::coordinator::{
    InMemoryDirectory, MembershipView, Outcome, SnapshotSink, TransactionCoordinator,
};
use crate::replica::recovery::RecoveryLog;
use crate::replica::state::ReplicaState;
use crate::transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::Instrument;
use uuid::Uuid;

/// Tunables for a replica.
#[derive(Debug, Clone)]
pub struct ReplicaOptions {
    /// Wait between two attempts at delivering a commit or rollback
    pub retry_delay: Duration,
    /// Read cohorts from this node's directory instead of our own
    pub master: Option<PeerHandle>,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            master: None,
        }
    }
}

pub struct Replica {
    server_id: String,
    handle: PeerHandle,
    state: Mutex<ReplicaState>,
    log: Arc<dyn RecoveryLog>,
    membership: MembershipView,
    coordinator: TransactionCoordinator,
}

impl Replica {
    /// Recover persisted state and register ourselves in a fresh directory.
    ///
    /// `shutdown` interrupts the commit/rollback retry loops.
    pub fn open(
        server_id: impl Into<String>,
        handle: PeerHandle,
        log: Arc<dyn RecoveryLog>,
        connector: Arc<dyn Connector>,
        options: ReplicaOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let server_id = server_id.into();
        let recovered = log.load_on_startup()?;
        let state = ReplicaState::recover(recovered);
        tracing::info!(
            "Server {} starting with {} entries",
            server_id,
            state.storage().len()
        );

        let membership = MembershipView::new(
            server_id.clone(),
            handle.clone(),
            Arc::new(InMemoryDirectory::new()),
            connector,
        )?
        .with_master(options.master);

        Ok(Self {
            server_id,
            handle,
            state: Mutex::new(state),
            log,
            membership,
            coordinator: TransactionCoordinator::new(options.retry_delay, shutdown),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    // === Client operations ===

    /// Local read; never contacts another node.
    pub async fn get(&self, key: &str) -> Response {
        let state = self.state.lock().await;
        match state.storage().get(key) {
            Some(value) => Response::found(value.clone()),
            None => Response::missing(key),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<Response> {
        self.coordinate(Transaction::put(key, value)).await
    }

    pub async fn delete(&self, key: &str) -> Result<Response> {
        self.coordinate(Transaction::delete(key)).await
    }

    /// Run `transaction` across the cluster with this node as coordinator.
    ///
    /// `Ok` carries the committed/aborted outcome. `Err` is always fatal.
    async fn coordinate(&self, transaction: Transaction) -> Result<Response> {
        let span = tracing::info_span!(
            "transaction",
            txn = %Uuid::new_v4(),
            operation = ?transaction.operation(),
            key = %transaction.key(),
        );

        async {
            let mut state = self.state.lock().await;
            let cohorts = self.membership.list_cohorts().await?;
            let report = self.coordinator.run(&transaction, cohorts).await?;
            for id in &report.dropped {
                self.membership.demote(id);
            }

            let committed = report.outcome == Outcome::Committed;
            if committed {
                state
                    .commit_local(&transaction, self.log.as_ref())
                    .map_err(|e| {
                        Error::Fatal(format!("Checkpoint after commit failed: {}", e))
                    })?;
                tracing::info!("Transaction committed");
            } else {
                tracing::info!("Transaction aborted");
            }
            Ok::<_, Error>(Response::write_outcome(transaction.operation(), committed))
        }
        .instrument(span)
        .await
    }

    // === Cohort entry point ===

    /// Handle a 2PC message from a coordinator. Any local failure becomes
    /// [`Error::Abort`].
    pub async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage> {
        tracing::info!("Received {} message", message.phase);
        let mut state = self.state.lock().await;
        state
            .handle(&message, self.log.as_ref())
            .map_err(|e| {
                tracing::warn!("Cannot process {} message: {}", message.phase, e);
                Error::Abort {
                    node: self.server_id.clone(),
                    reason: e.to_string(),
                }
            })
    }

    /// Copy of the live key-value map.
    pub async fn storage(&self) -> Snapshot {
        self.state.lock().await.storage().snapshot()
    }

    /// Copies of the undo and redo snapshots.
    pub async fn checkpoints(&self) -> (Snapshot, Snapshot) {
        let state = self.state.lock().await;
        (state.undo().clone(), state.redo().clone())
    }

    // === Membership ===

    pub fn register_new_server(&self, id: &str, handle: PeerHandle) -> Result<()> {
        self.membership.admit(id, handle)
    }

    pub fn directory_entries(&self) -> Result<Vec<DirectoryEntry>> {
        self.membership.entries()
    }

    /// Peers the next transaction would involve.
    pub async fn cohort_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .membership
            .list_cohorts()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    /// Join the cluster behind `seeds`, taking over its storage. Returns
    /// `false` when running standalone.
    pub async fn discover_cluster(&self, seeds: &[PeerHandle]) -> bool {
        let mut state = self.state.lock().await;
        let mut sink = StateSink {
            state: &mut *state,
            log: self.log.as_ref(),
        };
        self.membership.discover_cluster(seeds, &mut sink).await
    }
}

struct StateSink<'a> {
    state: &'a mut ReplicaState,
    log: &'a dyn RecoveryLog,
}

impl SnapshotSink for StateSink<'_> {
    fn install(&mut self, snapshot: Snapshot) -> Result<()> {
        self.state.install(snapshot, self.log)
    }
}
