//! Replica role: storage, recovery log, cohort state machine and the node
//! that ties them to the network

pub mod http;
pub mod node;
pub mod recovery;
pub mod server;
pub mod state;
pub mod storage;

pub use http::{create_router, NodeState, MAX_BODY_BYTES};
pub use node::{Replica, ReplicaOptions};
pub use recovery::{MemoryRecoveryLog, RecoveredState, RecoveryLog, SnapshotFileLog};
pub use server::{FatalSignal, NodeServer, Shutdown};
pub use state::ReplicaState;
pub use storage::StorageMap;
