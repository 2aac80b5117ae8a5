//! Two-phase commit driver
//!
//! 1. Query-to-commit goes to each cohort in turn. The first refusal, abort or
//!    transport failure decides abort; a cohort whose transport failed is
//!    dropped and gets no rollback.
//! 2. The decision (commit or rollback) goes to every remaining cohort. A
//!    refusal or abort is retried after a fixed delay until it succeeds; a
//!    transport failure drops the cohort without failing the transaction.
//!
//! Cohorts are visited sequentially, never in parallel.

use crate::common::{Error, Phase, ProtocolMessage, Result, Transaction};
use crate::coordinator::membership::Cohort;
use std::time::Duration;
use tokio::sync::watch;

/// Final decision of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Aborted,
}

/// What happened to one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub outcome: Outcome,
    /// Cohorts dropped after a transport failure, in the order they failed
    pub dropped: Vec<String>,
}

enum Delivery {
    Acknowledged,
    Unreachable,
}

pub struct TransactionCoordinator {
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl TransactionCoordinator {
    /// `shutdown` flipping to `true` interrupts the retry loops.
    pub fn new(retry_delay: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            retry_delay,
            shutdown,
        }
    }

    /// Drive `transaction` to a uniform outcome across `cohorts`.
    ///
    /// Only an interrupted retry wait returns `Err`, always [`Error::Fatal`]:
    /// at that point some cohorts may have applied the decision and others not.
    pub async fn run(
        &self,
        transaction: &Transaction,
        mut cohorts: Vec<Cohort>,
    ) -> Result<TransactionReport> {
        tracing::info!(
            "Fetched {} cohorts/participants to commit the change",
            cohorts.len()
        );
        let mut dropped = Vec::new();

        let outcome = self.propose(transaction, &mut cohorts, &mut dropped).await;
        let decision = match outcome {
            Outcome::Committed => {
                tracing::info!("Initializing commit procedure");
                ProtocolMessage::commit()
            }
            Outcome::Aborted => {
                tracing::info!("Initializing rollback procedure");
                ProtocolMessage::rollback()
            }
        };

        self.decide(&decision, &mut cohorts, &mut dropped).await?;
        Ok(TransactionReport { outcome, dropped })
    }

    async fn propose(
        &self,
        transaction: &Transaction,
        cohorts: &mut Vec<Cohort>,
        dropped: &mut Vec<String>,
    ) -> Outcome {
        let query = ProtocolMessage::query_to_commit(transaction.clone());

        for idx in 0..cohorts.len() {
            let cohort = &cohorts[idx];
            tracing::info!("Query to commit on server: {}", cohort.id);
            match cohort.peer.send(query.clone()).await {
                Ok(reply) if reply.is_yes() => {}
                Ok(reply) => {
                    tracing::info!(
                        "Query to commit failed on server {}: replied {}",
                        cohort.id,
                        reply.phase
                    );
                    return Outcome::Aborted;
                }
                Err(e) if e.is_transport() => {
                    tracing::info!(
                        "Query to commit failed as server {} is down, removing it: {}",
                        cohort.id,
                        e
                    );
                    let gone = cohorts.remove(idx);
                    dropped.push(gone.id);
                    return Outcome::Aborted;
                }
                Err(e) => {
                    tracing::info!("Query to commit failed on server {}: {}", cohort.id, e);
                    return Outcome::Aborted;
                }
            }
        }
        Outcome::Committed
    }

    async fn decide(
        &self,
        decision: &ProtocolMessage,
        cohorts: &mut Vec<Cohort>,
        dropped: &mut Vec<String>,
    ) -> Result<()> {
        let mut idx = 0;
        while idx < cohorts.len() {
            match self.deliver(&cohorts[idx], decision).await? {
                Delivery::Acknowledged => idx += 1,
                Delivery::Unreachable => {
                    let gone = cohorts.remove(idx);
                    dropped.push(gone.id);
                }
            }
        }
        Ok(())
    }

    /// Send `decision` until the cohort says yes or becomes unreachable.
    async fn deliver(&self, cohort: &Cohort, decision: &ProtocolMessage) -> Result<Delivery> {
        let phase = decision.phase;

        loop {
            tracing::info!("{} on server: {}", phase_label(phase), cohort.id);
            match cohort.peer.send(decision.clone()).await {
                Ok(reply) if reply.is_yes() => {
                    tracing::info!("{} succeeded on server: {}", phase_label(phase), cohort.id);
                    return Ok(Delivery::Acknowledged);
                }
                Ok(reply) => tracing::info!(
                    "{} failed on server {}: replied {}",
                    phase_label(phase),
                    cohort.id,
                    reply.phase
                ),
                Err(e) if e.is_transport() => {
                    tracing::info!(
                        "{} failed as server {} is down, removing it: {}",
                        phase_label(phase),
                        cohort.id,
                        e
                    );
                    return Ok(Delivery::Unreachable);
                }
                Err(e) => tracing::info!(
                    "{} failed on server {}: {}",
                    phase_label(phase),
                    cohort.id,
                    e
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = stopped(self.shutdown.clone()) => {
                    return Err(Error::Fatal(format!(
                        "{} on {} interrupted, system left in undesirable state",
                        phase_label(phase),
                        cohort.id
                    )));
                }
            }
            tracing::info!("Reattempting {} on server: {}", phase_label(phase), cohort.id);
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Commit => "Commit",
        Phase::Rollback => "Rollback",
        Phase::QueryToCommit => "Query to commit",
        Phase::Yes | Phase::No => "Reply",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DirectoryEntry, PeerHandle, Snapshot};
    use crate::transport::Peer;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// What a scripted peer does with one message.
    #[derive(Clone, Copy)]
    enum Act {
        Yes,
        No,
        Abort,
        Down,
    }

    /// Replies from a script per phase; the last act of a script repeats.
    struct ScriptedPeer {
        handle: PeerHandle,
        query: Mutex<VecDeque<Act>>,
        decision: Mutex<VecDeque<Act>>,
        seen: Mutex<Vec<Phase>>,
    }

    impl ScriptedPeer {
        fn new(name: &str, query: &[Act], decision: &[Act]) -> Arc<Self> {
            Arc::new(Self {
                handle: PeerHandle::new(format!("local://{}", name)),
                query: Mutex::new(query.iter().copied().collect()),
                decision: Mutex::new(decision.iter().copied().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Phase> {
            self.seen.lock().unwrap().clone()
        }

        fn next(script: &Mutex<VecDeque<Act>>) -> Act {
            let mut script = script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().unwrap_or(&Act::Yes)
            }
        }
    }

    #[async_trait]
    impl Peer for ScriptedPeer {
        fn handle(&self) -> &PeerHandle {
            &self.handle
        }

        async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage> {
            self.seen.lock().unwrap().push(message.phase);
            let act = match message.phase {
                Phase::QueryToCommit => Self::next(&self.query),
                _ => Self::next(&self.decision),
            };
            match act {
                Act::Yes => Ok(ProtocolMessage::yes()),
                Act::No => Ok(ProtocolMessage::no()),
                Act::Abort => Err(Error::Abort {
                    node: self.handle.to_string(),
                    reason: "scripted".into(),
                }),
                Act::Down => Err(Error::Unreachable {
                    node: self.handle.to_string(),
                    reason: "scripted".into(),
                }),
            }
        }

        async fn get_storage(&self) -> Result<Snapshot> {
            Ok(Snapshot::new())
        }

        async fn server_id(&self) -> Result<String> {
            Ok(self.handle.to_string())
        }

        async fn register_new_server(&self, _id: &str, _handle: &PeerHandle) -> Result<()> {
            Ok(())
        }

        async fn directory(&self) -> Result<Vec<DirectoryEntry>> {
            Ok(Vec::new())
        }
    }

    fn cohort(id: &str, peer: &Arc<ScriptedPeer>) -> Cohort {
        Cohort {
            id: id.to_string(),
            peer: peer.clone(),
        }
    }

    fn coordinator() -> (TransactionCoordinator, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            TransactionCoordinator::new(Duration::from_millis(5), rx),
            tx,
        )
    }

    #[tokio::test]
    async fn test_all_yes_commits_everywhere() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Yes], &[Act::Yes]);
        let c = ScriptedPeer::new("c", &[Act::Yes], &[Act::Yes]);

        let report = coord
            .run(
                &Transaction::put("x", "1"),
                vec![cohort("b", &b), cohort("c", &c)],
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Committed);
        assert!(report.dropped.is_empty());
        assert_eq!(b.seen(), vec![Phase::QueryToCommit, Phase::Commit]);
        assert_eq!(c.seen(), vec![Phase::QueryToCommit, Phase::Commit]);
    }

    #[tokio::test]
    async fn test_no_cohorts_commits() {
        let (coord, _stop) = coordinator();
        let report = coord
            .run(&Transaction::delete("x"), Vec::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Committed);
    }

    #[tokio::test]
    async fn test_refusal_stops_query_and_rolls_back() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Yes], &[Act::Yes]);
        let c = ScriptedPeer::new("c", &[Act::No], &[Act::Yes]);
        let d = ScriptedPeer::new("d", &[Act::Yes], &[Act::Yes]);

        let report = coord
            .run(
                &Transaction::put("x", "1"),
                vec![cohort("b", &b), cohort("c", &c), cohort("d", &d)],
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Aborted);
        assert_eq!(b.seen(), vec![Phase::QueryToCommit, Phase::Rollback]);
        assert_eq!(c.seen(), vec![Phase::QueryToCommit, Phase::Rollback]);
        // Never queried, still told to roll back
        assert_eq!(d.seen(), vec![Phase::Rollback]);
    }

    #[tokio::test]
    async fn test_abort_signal_aborts() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Abort], &[Act::Yes]);

        let report = coord
            .run(&Transaction::put("x", "1"), vec![cohort("b", &b)])
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Aborted);
        assert!(report.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_during_query_is_dropped() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Down], &[Act::Down]);
        let c = ScriptedPeer::new("c", &[Act::Yes], &[Act::Yes]);

        let report = coord
            .run(
                &Transaction::delete("x"),
                vec![cohort("b", &b), cohort("c", &c)],
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Aborted);
        assert_eq!(report.dropped, vec!["b".to_string()]);
        // No rollback for the dropped cohort
        assert_eq!(b.seen(), vec![Phase::QueryToCommit]);
        assert_eq!(c.seen(), vec![Phase::Rollback]);
    }

    #[tokio::test]
    async fn test_commit_retries_until_yes() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Yes], &[Act::No, Act::Abort, Act::Yes]);

        let report = coord
            .run(&Transaction::put("x", "1"), vec![cohort("b", &b)])
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Committed);
        assert_eq!(
            b.seen(),
            vec![
                Phase::QueryToCommit,
                Phase::Commit,
                Phase::Commit,
                Phase::Commit
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_during_commit_still_commits() {
        let (coord, _stop) = coordinator();
        let b = ScriptedPeer::new("b", &[Act::Yes], &[Act::Down]);
        let c = ScriptedPeer::new("c", &[Act::Yes], &[Act::Yes]);

        let report = coord
            .run(
                &Transaction::put("x", "1"),
                vec![cohort("b", &b), cohort("c", &c)],
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Committed);
        assert_eq!(report.dropped, vec!["b".to_string()]);
        assert_eq!(c.seen(), vec![Phase::QueryToCommit, Phase::Commit]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry() {
        let (tx, rx) = watch::channel(false);
        let coord = TransactionCoordinator::new(Duration::from_secs(3600), rx);
        let b = ScriptedPeer::new("b", &[Act::Yes], &[Act::No]);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });

        let err = coord
            .run(&Transaction::put("x", "1"), vec![cohort("b", &b)])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        let _tx = stopper.await.unwrap();
    }
}
