//! Messages exchanged between coordinators, cohorts and clients

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Full key-value map, as held in memory and in the undo/redo snapshots.
pub type Snapshot = BTreeMap<String, String>;

/// An intended mutation. Built by the coordinator, never altered by a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transaction {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Transaction {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Transaction::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Transaction::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Transaction::Put { key, .. } | Transaction::Delete { key } => key,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Transaction::Put { .. } => Operation::Put,
            Transaction::Delete { .. } => Operation::Delete,
        }
    }

    /// Apply this mutation to a map.
    pub fn apply_to(&self, map: &mut Snapshot) {
        match self {
            Transaction::Put { key, value } => {
                map.insert(key.clone(), value.clone());
            }
            Transaction::Delete { key } => {
                map.remove(key);
            }
        }
    }
}

/// 2PC phase carried by a [`ProtocolMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    QueryToCommit,
    Yes,
    Commit,
    Rollback,
    No,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::QueryToCommit => write!(f, "query-to-commit"),
            Phase::Yes => write!(f, "yes"),
            Phase::Commit => write!(f, "commit"),
            Phase::Rollback => write!(f, "rollback"),
            Phase::No => write!(f, "no"),
        }
    }
}

/// One protocol message. Nothing ties messages of the same transaction together
/// besides call order, so a cohort must only ever see one transaction at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

impl ProtocolMessage {
    pub fn query_to_commit(transaction: Transaction) -> Self {
        Self {
            phase: Phase::QueryToCommit,
            transaction: Some(transaction),
        }
    }

    pub fn commit() -> Self {
        Self::bare(Phase::Commit)
    }

    pub fn rollback() -> Self {
        Self::bare(Phase::Rollback)
    }

    pub fn yes() -> Self {
        Self::bare(Phase::Yes)
    }

    pub fn no() -> Self {
        Self::bare(Phase::No)
    }

    fn bare(phase: Phase) -> Self {
        Self {
            phase,
            transaction: None,
        }
    }

    pub fn is_yes(&self) -> bool {
        self.phase == Phase::Yes
    }
}

/// Client-visible operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Put,
    Get,
    Delete,
}

/// Reply to a client call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub operation: Operation,
    pub value: Option<String>,
    pub message: String,
    /// False only for a write that was rolled back. A missing key is a
    /// successful read.
    pub success: bool,
}

impl Response {
    pub fn found(value: String) -> Self {
        Self {
            operation: Operation::Get,
            value: Some(value),
            message: "successfully retrieved entry from storage".to_string(),
            success: true,
        }
    }

    pub fn missing(key: &str) -> Self {
        Self {
            operation: Operation::Get,
            value: None,
            message: format!("key {} does not exist in the storage", key),
            success: true,
        }
    }

    /// Outcome of a coordinated write.
    pub fn write_outcome(operation: Operation, committed: bool) -> Self {
        let message = match (operation, committed) {
            (Operation::Delete, true) => "Successfully deleted the entry from storage",
            (Operation::Delete, false) => "Failed to delete the entry from storage",
            (_, true) => "Successfully inserted the entry in storage",
            (_, false) => "Failed to insert the entry in storage",
        };
        Self {
            operation,
            value: None,
            message: message.to_string(),
            success: committed,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response [operation={:?}, value={}, message={}]",
            self.operation,
            self.value.as_deref().unwrap_or("null"),
            self.message
        )
    }
}

/// Opaque address a peer is reached through (an HTTP base URL in production).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerHandle(pub String);

impl PeerHandle {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One membership directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub handle: PeerHandle,
}

/// Body of `registerNewServer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub handle: PeerHandle,
}
