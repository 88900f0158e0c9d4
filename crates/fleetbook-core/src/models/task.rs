// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EnvironmentVariable, ResourceSpec};

/// Lifecycle state of a one-off task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for placement.
    Pending,
    /// Running on a cell.
    Running,
    /// Finished; completion callback not yet acknowledged.
    Completed,
    /// A consumer is delivering the completion callback.
    Resolving,
}

impl TaskState {
    /// Every state, in lifecycle order.
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Resolving,
    ];

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Resolving => "RESOLVING",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "RESOLVING" => Ok(Self::Resolving),
            other => Err(format!("unknown task state '{}'", other)),
        }
    }
}

/// Operations that move a task between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    /// A cell starts the task.
    Start,
    /// A client cancels the task.
    Cancel,
    /// The owning cell reports the result.
    Complete,
    /// The task fails without a cell result.
    Fail,
    /// A cell refuses the task; it goes back to pending.
    Reject,
    /// A consumer begins delivering the completion callback.
    Resolve,
    /// Convergence gives up on a stuck resolver.
    Demote,
    /// The consumer finished; the row goes away.
    Delete,
}

impl TaskAction {
    /// State the action targets, for error messages.
    pub fn target(&self) -> &'static str {
        match self {
            Self::Start => "RUNNING",
            Self::Cancel | Self::Complete | Self::Fail | Self::Demote => "COMPLETED",
            Self::Reject => "PENDING",
            Self::Resolve => "RESOLVING",
            Self::Delete => "DELETED",
        }
    }
}

/// Result of a legal action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The row moves to this state.
    Becomes(TaskState),
    /// The row is deleted.
    Deleted,
}

impl TaskState {
    /// Outcome of `action` from this state, or `None` when it is illegal.
    ///
    /// Cell ownership (start on the same cell, complete from the owning cell)
    /// is checked by the caller on top of this table.
    pub fn apply(self, action: TaskAction) -> Option<TaskOutcome> {
        use TaskAction as A;
        use TaskOutcome::*;
        use TaskState::*;

        match (self, action) {
            (Pending, A::Start) => Some(Becomes(Running)),
            (Pending, A::Cancel) => Some(Becomes(Completed)),
            (Pending, A::Complete) => Some(Becomes(Completed)),
            (Pending, A::Fail) => Some(Becomes(Completed)),
            (Pending, A::Reject) => Some(Becomes(Pending)),

            (Running, A::Cancel) => Some(Becomes(Completed)),
            (Running, A::Complete) => Some(Becomes(Completed)),
            (Running, A::Fail) => Some(Becomes(Completed)),
            (Running, A::Reject) => Some(Becomes(Pending)),

            (Completed, A::Resolve) => Some(Becomes(Resolving)),

            (Resolving, A::Demote) => Some(Becomes(Completed)),
            (Resolving, A::Delete) => Some(Deleted),

            _ => None,
        }
    }
}

/// What to run. Immutable once desired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Root filesystem.
    #[serde(default)]
    pub rootfs: String,
    /// Action graph.
    #[serde(default)]
    pub action: serde_json::Value,
    /// Environment.
    #[serde(default)]
    pub env: Vec<EnvironmentVariable>,
    /// Resources.
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Relative CPU share.
    #[serde(default)]
    pub cpu_weight: u32,
    /// Log stream identity.
    #[serde(default)]
    pub log_guid: String,
    /// File whose content becomes the task result.
    #[serde(default)]
    pub result_file: String,
    /// Where completion is reported.
    #[serde(default)]
    pub completion_callback_url: String,
    /// Cell placement tags.
    #[serde(default)]
    pub placement_tags: Vec<String>,
    /// Free-form client annotation.
    #[serde(default)]
    pub annotation: String,
}

/// A one-off task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique key.
    pub guid: String,
    /// Domain.
    pub domain: String,
    /// Current state.
    pub state: TaskState,
    /// Cell running the task; empty unless running.
    pub cell_id: String,
    /// Result reported on completion.
    pub result: String,
    /// Whether the task failed.
    pub failed: bool,
    /// Failure reason.
    pub failure_reason: String,
    /// What to run.
    pub definition: TaskDefinition,
    /// Times a cell refused the task.
    pub rejection_count: i32,
    /// Reason for the last refusal.
    pub rejection_reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
    /// Time the task first completed.
    pub first_completed_at: Option<DateTime<Utc>>,
}

/// Filter for listing tasks. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only this domain.
    pub domain: Option<String>,
    /// Only tasks on this cell.
    pub cell_id: Option<String>,
    /// Only tasks in this state.
    pub state: Option<TaskState>,
}
