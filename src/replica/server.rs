//! Node server: HTTP listener, cluster join and process lifetime

use crate::common::{Error, PeerHandle, Result};
use crate::replica::http::{create_router, NodeState};
use crate::replica::node::Replica;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Process-wide stop flag. Flipping it ends the listener and interrupts
/// pending commit/rollback retries.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets handlers report an unrecoverable error to the serve loop.
#[derive(Clone)]
pub struct FatalSignal {
    tx: mpsc::UnboundedSender<Error>,
}

impl FatalSignal {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report `err` if it is fatal, and hand it back to the caller.
    pub fn raise(&self, err: Error) -> Error {
        if err.is_fatal() {
            tracing::error!("{}", err);
            let _ = self.tx.send(Error::Fatal(err.to_string()));
        }
        err
    }
}

pub struct NodeServer {
    replica: Arc<Replica>,
    shutdown: Shutdown,
    bind_addr: SocketAddr,
    seeds: Vec<PeerHandle>,
}

impl NodeServer {
    /// `shutdown` must be the one the replica subscribed to.
    pub fn new(
        replica: Arc<Replica>,
        shutdown: Shutdown,
        bind_addr: SocketAddr,
        seeds: Vec<PeerHandle>,
    ) -> Self {
        Self {
            replica,
            shutdown,
            bind_addr,
            seeds,
        }
    }

    /// Serve until Ctrl-C (`Ok`) or a fatal error (`Err`).
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting server: {}", self.replica.server_id());
        tracing::info!("  HTTP API: {}", self.bind_addr);
        tracing::info!("  Handle: {}", self.replica.handle());

        let (fatal, mut fatal_rx) = FatalSignal::channel();
        let router = create_router(NodeState {
            replica: self.replica.clone(),
            fatal,
        });

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let mut stop = self.shutdown.subscribe();
        let mut http_server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stop| *stop).await;
                })
                .await
        });

        // Peers must be able to call back while we register with them
        self.replica.discover_cluster(&self.seeds).await;
        tracing::info!("Server {} ready", self.replica.server_id());

        let result = tokio::select! {
            res = &mut http_server => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(e) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
            },
            Some(err) = fatal_rx.recv() => Err(err),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
                Ok(())
            }
        };

        self.shutdown.trigger();
        if !http_server.is_finished() {
            let _ = http_server.await;
        }
        if let Err(e) = &result {
            tracing::error!("Server {} stopping: {}", self.replica.server_id(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert!(!*rx.borrow());

        shutdown.trigger();
        rx.wait_for(|stop| *stop).await.unwrap();
        assert!(*shutdown.subscribe().borrow());
    }

    #[tokio::test]
    async fn test_only_fatal_errors_are_raised() {
        let (fatal, mut rx) = FatalSignal::channel();

        let abort = fatal.raise(Error::Abort {
            node: "n".into(),
            reason: "refused".into(),
        });
        assert!(matches!(abort, Error::Abort { .. }));
        assert!(rx.try_recv().is_err());

        fatal.raise(Error::Fatal("commit interrupted".into()));
        assert!(rx.try_recv().unwrap().is_fatal());
    }
}
