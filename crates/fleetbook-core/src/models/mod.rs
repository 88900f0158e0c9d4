// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records: desired and actual LRPs, tasks, cells, and the pure
//! transition rules that govern them.

mod actual_lrp;
mod cell;
mod desired_lrp;
mod modification_tag;
mod restart_calculator;
mod task;

pub use self::actual_lrp::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo,
    ActualLrpState, KeyRequirement, PortMapping, Presence,
};
pub use self::cell::{CellPresence, CellSet};
pub use self::desired_lrp::{
    DesiredLrp, DesiredLrpFilter, DesiredLrpSchedulingInfo, DesiredLrpUpdate, EnvironmentVariable,
    ResourceSpec, Routes, RunInfo,
};
pub use self::modification_tag::ModificationTag;
pub use self::restart_calculator::RestartCalculator;
pub use self::task::{Task, TaskAction, TaskDefinition, TaskFilter, TaskOutcome, TaskState};

/// Upper bound, in bytes, for stored failure, rejection, crash and placement reasons.
pub const MAX_REASON_LENGTH: usize = 1024;

/// Marker appended to clipped reasons.
pub const TRUNCATED_SUFFIX: &str = "(truncated)";

/// Clip `s` to at most `max_len` bytes, marking clipped values with [`TRUNCATED_SUFFIX`].
///
/// The cut happens on a char boundary, so the result may be a few bytes
/// shorter than `max_len` for multi-byte input.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len.saturating_sub(TRUNCATED_SUFFIX.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &s[..cut], TRUNCATED_SUFFIX)
}

/// Before/after snapshot returned by every mutating operation.
///
/// `before` is `None` for creations and `after` is `None` for deletions.
/// An operation that turned out to be a no-op returns identical snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    /// Record as it was before the operation.
    pub before: Option<T>,
    /// Record as it is after the operation.
    pub after: Option<T>,
}

impl<T> Transition<T> {
    pub(crate) fn created(after: T) -> Self {
        Self {
            before: None,
            after: Some(after),
        }
    }

    pub(crate) fn changed(before: T, after: T) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }

    pub(crate) fn removed(before: T) -> Self {
        Self {
            before: Some(before),
            after: None,
        }
    }
}

impl<T: Clone> Transition<T> {
    pub(crate) fn unchanged(record: T) -> Self {
        Self {
            before: Some(record.clone()),
            after: Some(record),
        }
    }
}

impl<T: PartialEq> Transition<T> {
    /// True when the operation did not modify the record.
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}
