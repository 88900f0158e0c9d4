// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// Optimistic-concurrency marker carried by desired LRPs and actual LRPs.
///
/// `epoch` identifies one incarnation of a record and is regenerated on
/// creation; `index` increases with every mutation of that incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    /// Opaque identity of this incarnation.
    pub epoch: String,
    /// Mutation counter.
    pub index: i64,
}

impl ModificationTag {
    /// A fresh tag for a newly created record.
    pub fn new(epoch: impl Into<String>) -> Self {
        Self {
            epoch: epoch.into(),
            index: 0,
        }
    }

    /// Record one mutation.
    pub fn increment(&mut self) {
        self.index += 1;
    }

    /// True if `self` was produced after `other` for the same incarnation.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        self.epoch == other.epoch && self.index < other.index
    }
}
