//! Coordinator role
//!
//! Any node coordinates the writes it receives:
//! - Membership: directory of known nodes, join and demotion
//! - Transaction: the two-phase commit driver

pub mod membership;
pub mod transaction;

pub use membership::{Cohort, Directory, InMemoryDirectory, MembershipView, SnapshotSink};
pub use transaction::{Outcome, TransactionCoordinator, TransactionReport};
