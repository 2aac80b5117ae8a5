//! # replikv
//!
//! A replicated key-value store. Every node holds a full copy of the data and
//! any node can take a write, coordinating it across the others with
//! two-phase commit:
//! - Undo/redo snapshots on disk for crash recovery
//! - Membership directory per node, with join-by-seed and demotion of dead peers
//! - HTTP/JSON between nodes and for clients
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  client ── PUT /kv/x ──▶ ┌──────────────┐
//!                          │  Node A      │ coordinator for this write
//!                          │  (lock held) │
//!                          └──┬────────┬──┘
//!        query-to-commit /    │        │    commit | rollback
//!                             ▼        ▼
//!                     ┌──────────┐  ┌──────────┐
//!                     │ Node B   │  │ Node C   │ cohorts
//!                     │ undo/redo│  │ undo/redo│
//!                     └──────────┘  └──────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start nodes
//! ```bash
//! replikv-node 5000 --config resources/config.toml
//! replikv-node 5001 --config resources/config.toml
//! ```
//!
//! ### Use the CLI
//! ```bash
//! replikv --node http://127.0.0.1:5000 put city Paris
//! replikv --node http://127.0.0.1:5001 get city
//! replikv --node http://127.0.0.1:5000 delete city
//! ```

pub mod common;
pub mod coordinator;
pub mod replica;
pub mod transport;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use replica::{NodeServer, Replica, ReplicaOptions};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
