// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task convergence pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::time_before;
use crate::error::Result;
use crate::events::TaskEvent;
use crate::metrics::MetricsSink;
use crate::models::{CellSet, Task, TaskDefinition, TaskState, Transition};
use crate::persistence::sql::Filter;
use crate::persistence::{SqlStore, TaskFix};

/// Durations that drive a task pass.
#[derive(Debug, Clone)]
pub struct TaskConvergenceConfig {
    /// PENDING and COMPLETED tasks untouched this long are re-delivered.
    pub kick_task_duration: Duration,
    /// PENDING tasks older than this fail.
    pub expire_pending_task_duration: Duration,
    /// Finished tasks first completed longer ago than this are deleted.
    pub expire_completed_task_duration: Duration,
}

impl Default for TaskConvergenceConfig {
    fn default() -> Self {
        Self {
            kick_task_duration: Duration::from_secs(30),
            expire_pending_task_duration: Duration::from_secs(30 * 60),
            expire_completed_task_duration: Duration::from_secs(120),
        }
    }
}

/// A PENDING task to hand to placement again.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStartRequest {
    /// Task guid.
    pub guid: String,
    /// Task domain.
    pub domain: String,
    /// What to run.
    pub definition: TaskDefinition,
}

/// Everything one task pass decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskConvergenceResult {
    /// PENDING tasks to auction again.
    pub tasks_to_auction: Vec<TaskStartRequest>,
    /// COMPLETED tasks whose callbacks should be delivered.
    pub tasks_to_complete: Vec<Task>,
    /// Changes the pass made itself.
    pub events: Vec<TaskEvent>,
}

/// Runs task convergence passes against a store.
pub struct TaskConvergence {
    store: SqlStore,
    metrics: Arc<dyn MetricsSink>,
}

impl TaskConvergence {
    /// Create a convergence engine.
    pub fn new(store: SqlStore, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Run one pass against the live `cells`.
    pub async fn converge(
        &self,
        cells: &CellSet,
        config: &TaskConvergenceConfig,
    ) -> Result<TaskConvergenceResult> {
        let started = Instant::now();
        let now = self.store.now();
        let kick_before = time_before(now, config.kick_task_duration);
        let pending_before = time_before(now, config.expire_pending_task_duration);
        let completed_before = time_before(now, config.expire_completed_task_duration);

        let (tasks, mut pruned) = {
            let mut conn = self.store.pool().acquire().await?;
            self.store.select_tasks(&mut conn, Filter::all()).await?
        };

        let mut result = TaskConvergenceResult::default();
        let mut survivors: Vec<Task> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let fix = match task.state {
                TaskState::Pending if task.created_at < pending_before => {
                    Some(TaskFix::ExpirePending {
                        created_before: pending_before,
                    })
                }
                TaskState::Running if !cells.contains(&task.cell_id) => {
                    Some(TaskFix::FailOnMissingCell { cells })
                }
                TaskState::Completed | TaskState::Resolving
                    if task
                        .first_completed_at
                        .is_some_and(|at| at < completed_before) =>
                {
                    Some(TaskFix::PruneCompleted { completed_before })
                }
                TaskState::Resolving if task.updated_at < kick_before => {
                    Some(TaskFix::DemoteResolving {
                        updated_before: kick_before,
                    })
                }
                _ => None,
            };

            let Some(fix) = fix else {
                survivors.push(task);
                continue;
            };

            match self.store.fix_task(&task.guid, fix).await {
                Ok(Some(transition)) => {
                    log_fix(&task, &transition);
                    if let Some(after) = &transition.after {
                        survivors.push(after.clone());
                        if after.state == TaskState::Completed
                            && task.state != TaskState::Resolving
                        {
                            // failed by this pass, deliver its callback now
                            result.tasks_to_complete.push(after.clone());
                        }
                    } else {
                        pruned += 1;
                    }
                    result.events.extend(TaskEvent::from_transition(transition));
                }
                Ok(None) => survivors.push(task),
                Err(e) => {
                    warn!(task_guid = %task.guid, error = %e, "Failed to converge task");
                    survivors.push(task);
                }
            }
        }

        let mut counts = [0i64; 4];
        for task in &survivors {
            counts[state_slot(task.state)] += 1;
            match task.state {
                TaskState::Pending
                    if task.updated_at < kick_before && task.created_at >= pending_before =>
                {
                    result.tasks_to_auction.push(TaskStartRequest {
                        guid: task.guid.clone(),
                        domain: task.domain.clone(),
                        definition: task.definition.clone(),
                    });
                }
                TaskState::Completed
                    if task.updated_at < kick_before
                        && !result.tasks_to_complete.iter().any(|t| t.guid == task.guid) =>
                {
                    result.tasks_to_complete.push(task.clone());
                }
                _ => {}
            }
        }
        result.tasks_to_complete.sort_by(|a, b| a.guid.cmp(&b.guid));

        let kicked = (result.tasks_to_auction.len() + result.tasks_to_complete.len()) as u64;
        self.metrics.gauge("TasksPending", counts[0]);
        self.metrics.gauge("TasksRunning", counts[1]);
        self.metrics.gauge("TasksCompleted", counts[2]);
        self.metrics.gauge("TasksResolving", counts[3]);
        self.metrics.counter("ConvergenceTasksKicked", kicked);
        self.metrics.counter("ConvergenceTasksPruned", pruned);

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            to_auction = result.tasks_to_auction.len(),
            to_complete = result.tasks_to_complete.len(),
            pruned,
            "Task convergence completed"
        );
        Ok(result)
    }
}

fn state_slot(state: TaskState) -> usize {
    match state {
        TaskState::Pending => 0,
        TaskState::Running => 1,
        TaskState::Completed => 2,
        TaskState::Resolving => 3,
    }
}

fn log_fix(task: &Task, transition: &Transition<Task>) {
    match &transition.after {
        Some(after) if after.failed && !task.failed => {
            info!(
                task_guid = %task.guid,
                reason = %after.failure_reason,
                "Failed task during convergence"
            );
        }
        Some(_) => debug!(task_guid = %task.guid, "Demoted resolving task"),
        None => debug!(task_guid = %task.guid, "Deleted expired task"),
    }
}
