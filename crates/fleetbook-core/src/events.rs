// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Change events produced by convergence, ready for an event hub to publish.

use crate::models::{ActualLrp, Task, Transition};

/// A change to an actual LRP row.
#[derive(Debug, Clone, PartialEq)]
pub enum ActualLrpEvent {
    /// A row was inserted.
    Created(ActualLrp),
    /// A row changed.
    Changed {
        /// Row before the change.
        before: ActualLrp,
        /// Row after the change.
        after: ActualLrp,
    },
    /// A row was deleted.
    Removed(ActualLrp),
}

impl ActualLrpEvent {
    /// Event describing `transition`, or `None` for a no-op.
    pub fn from_transition(transition: Transition<ActualLrp>) -> Option<Self> {
        match (transition.before, transition.after) {
            (None, Some(after)) => Some(Self::Created(after)),
            (Some(before), Some(after)) if before != after => {
                Some(Self::Changed { before, after })
            }
            (Some(before), None) => Some(Self::Removed(before)),
            _ => None,
        }
    }

    /// The row the event is about, after the change where there is one.
    pub fn actual_lrp(&self) -> &ActualLrp {
        match self {
            Self::Created(lrp) | Self::Removed(lrp) => lrp,
            Self::Changed { after, .. } => after,
        }
    }
}

/// A change to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task changed state.
    Changed {
        /// Task before the change.
        before: Task,
        /// Task after the change.
        after: Task,
    },
    /// A task was deleted.
    Removed(Task),
}

impl TaskEvent {
    /// Event describing `transition`, or `None` for a no-op.
    pub fn from_transition(transition: Transition<Task>) -> Option<Self> {
        match (transition.before, transition.after) {
            (Some(before), Some(after)) if before != after => {
                Some(Self::Changed { before, after })
            }
            (Some(before), None) => Some(Self::Removed(before)),
            _ => None,
        }
    }

    /// Guid of the task.
    pub fn task_guid(&self) -> &str {
        match self {
            Self::Changed { after, .. } => &after.guid,
            Self::Removed(task) => &task.guid,
        }
    }
}
