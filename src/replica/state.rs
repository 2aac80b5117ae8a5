//! Replica state and the cohort side of two-phase commit
//!
//! All methods here assume the caller holds the node lock. Messages carry no
//! transaction id, so a cohort tracks a single pending prepare at a time.

use crate::common::{Phase, ProtocolMessage, Result, Snapshot, Transaction};
use crate::replica::recovery::{RecoveredState, RecoveryLog};
use crate::replica::storage::StorageMap;

#[derive(Debug, Default)]
pub struct ReplicaState {
    storage: StorageMap,
    undo: Snapshot,
    redo: Snapshot,
    /// A query-to-commit was prepared and no decision has arrived since.
    pending: bool,
}

impl ReplicaState {
    /// Rebuild from persisted snapshots. The redo snapshot is the latest decided
    /// state; the undo snapshot stands in when only it survived.
    pub fn recover(recovered: RecoveredState) -> Self {
        let undo = recovered.undo.unwrap_or_default();
        let redo = match recovered.redo {
            Some(redo) => redo,
            None => undo.clone(),
        };
        Self {
            storage: StorageMap::from_snapshot(redo.clone()),
            undo,
            redo,
            pending: false,
        }
    }

    pub fn storage(&self) -> &StorageMap {
        &self.storage
    }

    pub fn undo(&self) -> &Snapshot {
        &self.undo
    }

    pub fn redo(&self) -> &Snapshot {
        &self.redo
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.pending
    }

    /// Cohort entry point. `Err` means this node must signal an abort.
    pub fn handle(
        &mut self,
        message: &ProtocolMessage,
        log: &dyn RecoveryLog,
    ) -> Result<ProtocolMessage> {
        match message.phase {
            Phase::QueryToCommit => match &message.transaction {
                Some(transaction) => {
                    self.prepare(transaction, log)?;
                    Ok(ProtocolMessage::yes())
                }
                None => {
                    tracing::warn!("Query to commit without a transaction, refusing");
                    Ok(ProtocolMessage::no())
                }
            },
            Phase::Commit => {
                self.commit();
                Ok(ProtocolMessage::yes())
            }
            Phase::Rollback => {
                self.rollback(log)?;
                Ok(ProtocolMessage::yes())
            }
            Phase::Yes | Phase::No => {
                tracing::warn!("Unexpected {} message for a cohort, refusing", message.phase);
                Ok(ProtocolMessage::no())
            }
        }
    }

    /// Undo checkpoint, tentative apply, redo checkpoint. On failure memory is
    /// restored and nothing is left half-prepared.
    fn prepare(&mut self, transaction: &Transaction, log: &dyn RecoveryLog) -> Result<()> {
        let before = self.storage.snapshot();
        log.persist_undo(&before)?;

        let mut after = before.clone();
        transaction.apply_to(&mut after);
        self.storage.restore(&after);

        if let Err(e) = log.persist_redo(&after) {
            self.storage.restore(&before);
            return Err(e);
        }

        self.undo = before;
        self.redo = after;
        self.pending = true;
        Ok(())
    }

    /// Install the redo snapshot. Repeating it changes nothing.
    fn commit(&mut self) {
        if !self.pending {
            tracing::debug!("Commit with nothing pending, no-op");
        }
        self.storage.restore(&self.redo);
        self.pending = false;
    }

    /// Reinstall the undo snapshot and make the redo file agree with it.
    /// With nothing pending this is a no-op, so a cohort that never prepared
    /// this transaction is not reverted to an older one.
    fn rollback(&mut self, log: &dyn RecoveryLog) -> Result<()> {
        if !self.pending {
            tracing::debug!("Rollback with nothing pending, no-op");
            return Ok(());
        }
        self.storage.restore(&self.undo);
        log.persist_redo(&self.undo)?;
        self.redo.clone_from(&self.undo);
        self.pending = false;
        Ok(())
    }

    /// Coordinator-side checkpoint once every cohort has committed.
    pub fn commit_local(
        &mut self,
        transaction: &Transaction,
        log: &dyn RecoveryLog,
    ) -> Result<()> {
        let before = self.storage.snapshot();
        log.persist_undo(&before)?;
        self.undo = before;

        self.storage.apply(transaction);
        let after = self.storage.snapshot();
        log.persist_redo(&after)?;
        self.redo = after;
        self.pending = false;
        Ok(())
    }

    /// Take over a snapshot copied from the cluster on join.
    pub fn install(&mut self, snapshot: Snapshot, log: &dyn RecoveryLog) -> Result<()> {
        log.persist_undo(&snapshot)?;
        log.persist_redo(&snapshot)?;
        self.storage.restore(&snapshot);
        self.undo.clone_from(&snapshot);
        self.redo = snapshot;
        self.pending = false;
        Ok(())
    }
}
