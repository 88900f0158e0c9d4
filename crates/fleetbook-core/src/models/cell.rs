// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A cell's self-registration, stored as the value of its presence lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPresence {
    /// Cell identity.
    pub cell_id: String,
    /// Address of the cell's representative.
    pub rep_address: String,
    /// Availability zone.
    #[serde(default)]
    pub zone: String,
}

impl CellPresence {
    /// Build a presence.
    pub fn new(
        cell_id: impl Into<String>,
        rep_address: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            cell_id: cell_id.into(),
            rep_address: rep_address.into(),
            zone: zone.into(),
        }
    }
}

/// Snapshot of the live cells, keyed by cell id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSet(HashMap<String, CellPresence>);

impl CellSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a cell.
    pub fn insert(&mut self, presence: CellPresence) {
        self.0.insert(presence.cell_id.clone(), presence);
    }

    /// Whether `cell_id` is live.
    pub fn contains(&self, cell_id: &str) -> bool {
        self.0.contains_key(cell_id)
    }

    /// Presence of a live cell.
    pub fn get(&self, cell_id: &str) -> Option<&CellPresence> {
        self.0.get(cell_id)
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no cells are live.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Live cells in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &CellPresence> {
        self.0.values()
    }
}

impl FromIterator<CellPresence> for CellSet {
    fn from_iter<I: IntoIterator<Item = CellPresence>>(iter: I) -> Self {
        let mut set = CellSet::new();
        for presence in iter {
            set.insert(presence);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_set_lookup() {
        let set: CellSet = [
            CellPresence::new("c1", "http://c1:1800", "z1"),
            CellPresence::new("c2", "http://c2:1800", "z2"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert!(set.contains("c1"));
        assert!(!set.contains("c3"));
        assert_eq!(set.get("c2").map(|p| p.zone.as_str()), Some("z2"));
        assert!(CellSet::new().is_empty());
    }
}
