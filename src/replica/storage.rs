//! In-memory key-value table of a replica
//!
//! Plain map with no locking of its own; the owning replica serialises all
//! access behind its node lock.

use crate::common::{Snapshot, Transaction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageMap {
    map: Snapshot,
}

impl StorageMap {
    pub fn from_snapshot(map: Snapshot) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    pub fn apply(&mut self, transaction: &Transaction) {
        transaction.apply_to(&mut self.map);
    }

    /// Copy of the whole table.
    pub fn snapshot(&self) -> Snapshot {
        self.map.clone()
    }

    /// Replace the whole table.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.map.clone_from(snapshot);
    }

    pub fn as_map(&self) -> &Snapshot {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
