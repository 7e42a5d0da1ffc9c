//! Last-known client snapshot and membership diffing

use crate::backend::{ClientId, Snapshot};
use std::collections::HashSet;

/// Membership change between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// In the new snapshot but not the old one, in new-snapshot order
    pub arrived: Vec<ClientId>,
    /// In the old snapshot but not the new one, in old-snapshot order
    pub departed: Vec<ClientId>,
}

impl Diff {
    pub fn between(previous: &Snapshot, current: &Snapshot) -> Self {
        let before: HashSet<&ClientId> = previous.iter().collect();
        let after: HashSet<&ClientId> = current.iter().collect();

        Self {
            arrived: current
                .iter()
                .filter(|id| !before.contains(id))
                .cloned()
                .collect(),
            departed: previous
                .iter()
                .filter(|id| !after.contains(id))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.departed.is_empty()
    }
}

/// Holds the snapshot taken by the previous reconciliation cycle
#[derive(Debug, Default)]
pub struct Registry {
    current: Snapshot,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// What would change if `next` were committed
    pub fn diff(&self, next: &Snapshot) -> Diff {
        Diff::between(&self.current, next)
    }

    /// Replace the held snapshot wholesale
    pub fn commit(&mut self, next: Snapshot) {
        self.current = next;
    }
}
