// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task state machine over the `tasks` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::AnyConnection;
use tracing::{debug, info, warn};

use super::sql::{self, Filter, Select, SqlValue};
use super::{SqlStore, TaskDb};
use crate::clock::{from_nanos, optional_from_nanos, to_nanos};
use crate::error::{Result, StoreError};
use crate::models::{
    CellSet, MAX_REASON_LENGTH, Task, TaskAction, TaskDefinition, TaskFilter, TaskOutcome,
    TaskState, Transition, truncate_string,
};

pub(crate) const TABLE: &str = "tasks";

const COLUMNS: &str = "guid, domain, state, cell_id, result, failed, failure_reason, \
     task_definition, rejection_count, rejection_reason, created_at, updated_at, \
     first_completed_at";

pub(crate) const CANCELLED_REASON: &str = "task was cancelled";
pub(crate) const NOT_STARTED_REASON: &str = "not started within time limit";
pub(crate) const CELL_DISAPPEARED_REASON: &str = "cell disappeared before completion";

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    guid: String,
    domain: String,
    state: String,
    cell_id: String,
    result: String,
    failed: i64,
    failure_reason: String,
    task_definition: String,
    rejection_count: i64,
    rejection_reason: String,
    created_at: i64,
    updated_at: i64,
    first_completed_at: i64,
}

impl TaskRow {
    fn into_model(self) -> Result<Task> {
        let corrupt = |details: String| StoreError::Deserialize {
            resource: "task",
            key: self.guid.clone(),
            details,
        };
        let state = self.state.parse::<TaskState>().map_err(corrupt)?;
        let definition: TaskDefinition = serde_json::from_str(&self.task_definition)
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Task {
            guid: self.guid,
            domain: self.domain,
            state,
            cell_id: self.cell_id,
            result: self.result,
            failed: self.failed != 0,
            failure_reason: self.failure_reason,
            definition,
            rejection_count: self.rejection_count as i32,
            rejection_reason: self.rejection_reason,
            created_at: from_nanos(self.created_at),
            updated_at: from_nanos(self.updated_at),
            first_completed_at: optional_from_nanos(self.first_completed_at),
        })
    }
}

fn mutable_columns(task: &Task) -> Vec<(&'static str, SqlValue)> {
    vec![
        ("state", task.state.as_str().into()),
        ("cell_id", (&task.cell_id).into()),
        ("result", (&task.result).into()),
        ("failed", task.failed.into()),
        ("failure_reason", (&task.failure_reason).into()),
        ("rejection_count", task.rejection_count.into()),
        ("rejection_reason", (&task.rejection_reason).into()),
        ("updated_at", to_nanos(task.updated_at).into()),
        (
            "first_completed_at",
            task.first_completed_at.map(to_nanos).unwrap_or(0).into(),
        ),
    ]
}

/// Error for an action the state table refuses.
fn illegal(action: TaskAction, task: &Task) -> StoreError {
    match action {
        TaskAction::Reject => StoreError::BadRequest {
            message: format!(
                "task '{}' cannot be rejected in state {}",
                task.guid, task.state
            ),
        },
        _ => StoreError::InvalidStateTransition {
            resource: "task",
            key: task.guid.clone(),
            from: task.state.to_string(),
            to: action.target().to_string(),
        },
    }
}

fn next_state(action: TaskAction, task: &Task) -> Result<TaskState> {
    match task.state.apply(action) {
        Some(TaskOutcome::Becomes(state)) => Ok(state),
        _ => Err(illegal(action, task)),
    }
}

/// Move `task` to COMPLETED with the given outcome.
fn complete_in_place(
    task: &mut Task,
    now: DateTime<Utc>,
    failed: bool,
    failure_reason: &str,
    result: &str,
) {
    task.state = TaskState::Completed;
    task.cell_id.clear();
    task.failed = failed;
    task.failure_reason = truncate_string(failure_reason, MAX_REASON_LENGTH);
    task.result = result.to_string();
    task.updated_at = now;
    task.first_completed_at.get_or_insert(now);
}

/// Correction applied by task convergence, re-checked under the row lock.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TaskFix<'a> {
    /// Fail a PENDING task created before the cutoff.
    ExpirePending { created_before: DateTime<Utc> },
    /// Fail a RUNNING task whose cell is not in the set.
    FailOnMissingCell { cells: &'a CellSet },
    /// Send a RESOLVING task last touched before the cutoff back to COMPLETED.
    DemoteResolving { updated_before: DateTime<Utc> },
    /// Delete a COMPLETED or RESOLVING task first completed before the cutoff.
    PruneCompleted { completed_before: DateTime<Utc> },
}

impl SqlStore {
    async fn delete_corrupt_task(
        &self,
        conn: &mut AnyConnection,
        guid: &str,
        err: &StoreError,
    ) -> Result<()> {
        warn!(task_guid = %guid, error = %err, "Deleting corrupt task");
        sql::delete(conn, self.dialect, TABLE, &Filter::all().eq("guid", guid)).await?;
        Ok(())
    }

    /// List tasks, deleting corrupt rows. Returns the tasks and how many rows were pruned.
    pub(crate) async fn select_tasks(
        &self,
        conn: &mut AnyConnection,
        filter: Filter,
    ) -> Result<(Vec<Task>, u64)> {
        let rows: Vec<TaskRow> = Select::new(TABLE, COLUMNS, filter)
            .order_by("guid")
            .fetch_all(conn, self.dialect)
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        let mut pruned = 0;
        for row in rows {
            let guid = row.guid.clone();
            match row.into_model() {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    self.delete_corrupt_task(conn, &guid, &e).await?;
                    pruned += 1;
                }
            }
        }
        Ok((tasks, pruned))
    }

    async fn lock_task(&self, conn: &mut AnyConnection, guid: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = Select::new(TABLE, COLUMNS, Filter::all().eq("guid", guid))
            .for_update()
            .fetch_optional(conn, self.dialect)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        match row.into_model() {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                self.delete_corrupt_task(conn, guid, &e).await?;
                Ok(None)
            }
        }
    }

    async fn write_task(&self, conn: &mut AnyConnection, task: &Task) -> Result<()> {
        let affected = sql::update(
            conn,
            self.dialect,
            TABLE,
            &mutable_columns(task),
            &Filter::all().eq("guid", &task.guid),
        )
        .await?;
        if affected == 0 {
            return Err(StoreError::not_found("task", &task.guid));
        }
        Ok(())
    }

    /// Lock the task, let `change` validate and edit a copy, and persist it.
    async fn mutate_task<F>(
        &self,
        operation: &'static str,
        guid: &str,
        change: F,
    ) -> Result<Transition<Task>>
    where
        F: Fn(&Task, DateTime<Utc>) -> Result<Option<Task>> + Send + Sync,
    {
        let change = &change;
        self.transact(operation, move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self.lock_task(&mut *tx, guid).await? else {
                tx.commit().await?;
                return Err(StoreError::not_found("task", guid));
            };

            let Some(after) = change(&before, self.now())? else {
                tx.commit().await?;
                return Ok(Transition::unchanged(before));
            };
            self.write_task(&mut *tx, &after).await?;
            tx.commit().await?;

            debug!(
                task_guid = %guid,
                from = %before.state,
                to = %after.state,
                operation,
                "Task transitioned"
            );
            Ok(Transition::changed(before, after))
        })
        .await
    }

    /// Apply a convergence correction if it still holds under the row lock.
    pub(crate) async fn fix_task(
        &self,
        guid: &str,
        fix: TaskFix<'_>,
    ) -> Result<Option<Transition<Task>>> {
        self.transact("converge_task", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self.lock_task(&mut *tx, guid).await? else {
                tx.commit().await?;
                return Ok(None);
            };
            let now = self.now();

            let transition = match fix {
                TaskFix::ExpirePending { created_before } => {
                    if before.state != TaskState::Pending || before.created_at >= created_before {
                        None
                    } else {
                        let mut after = before.clone();
                        complete_in_place(&mut after, now, true, NOT_STARTED_REASON, "");
                        self.write_task(&mut *tx, &after).await?;
                        Some(Transition::changed(before, after))
                    }
                }
                TaskFix::FailOnMissingCell { cells } => {
                    if before.state != TaskState::Running || cells.contains(&before.cell_id) {
                        None
                    } else {
                        let mut after = before.clone();
                        complete_in_place(&mut after, now, true, CELL_DISAPPEARED_REASON, "");
                        self.write_task(&mut *tx, &after).await?;
                        Some(Transition::changed(before, after))
                    }
                }
                TaskFix::DemoteResolving { updated_before } => {
                    if before.state != TaskState::Resolving || before.updated_at >= updated_before
                    {
                        None
                    } else {
                        let mut after = before.clone();
                        after.state = next_state(TaskAction::Demote, &before)?;
                        self.write_task(&mut *tx, &after).await?;
                        Some(Transition::changed(before, after))
                    }
                }
                TaskFix::PruneCompleted { completed_before } => {
                    let finished = matches!(
                        before.state,
                        TaskState::Completed | TaskState::Resolving
                    );
                    let expired = before
                        .first_completed_at
                        .is_some_and(|at| at < completed_before);
                    if !(finished && expired) {
                        None
                    } else {
                        sql::delete(
                            &mut *tx,
                            self.dialect,
                            TABLE,
                            &Filter::all().eq("guid", guid),
                        )
                        .await?;
                        Some(Transition::removed(before))
                    }
                }
            };
            tx.commit().await?;
            Ok(transition)
        })
        .await
    }
}

#[async_trait]
impl TaskDb for SqlStore {
    async fn desire_task(
        &self,
        guid: &str,
        domain: &str,
        definition: &TaskDefinition,
    ) -> Result<Task> {
        if guid.is_empty() {
            return Err(StoreError::Validation {
                field: "task_guid",
                message: "must not be empty".to_string(),
            });
        }
        if domain.is_empty() {
            return Err(StoreError::Validation {
                field: "domain",
                message: "must not be empty".to_string(),
            });
        }
        let encoded = serde_json::to_string(definition)?;
        let encoded = encoded.as_str();

        self.transact("desire_task", move || async move {
            let now = self.now();
            let task = Task {
                guid: guid.to_string(),
                domain: domain.to_string(),
                state: TaskState::Pending,
                cell_id: String::new(),
                result: String::new(),
                failed: false,
                failure_reason: String::new(),
                definition: definition.clone(),
                rejection_count: 0,
                rejection_reason: String::new(),
                created_at: now,
                updated_at: now,
                first_completed_at: None,
            };

            let mut values = vec![
                ("guid", SqlValue::from(guid)),
                ("domain", domain.into()),
                ("task_definition", encoded.into()),
                ("created_at", to_nanos(now).into()),
            ];
            values.extend(mutable_columns(&task));

            let mut tx = self.pool.begin().await?;
            sql::insert(&mut *tx, self.dialect, TABLE, &values)
                .await
                .map_err(|e| e.exists_as("task", guid))?;
            tx.commit().await?;

            info!(task_guid = %guid, domain = %domain, "Task desired");
            Ok(task)
        })
        .await
    }

    async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let filter = Filter::all()
            .eq_opt("domain", filter.domain.as_deref())
            .eq_opt("cell_id", filter.cell_id.as_deref())
            .eq_opt("state", filter.state.map(|s| s.as_str()));
        let mut conn = self.pool.acquire().await?;
        let (tasks, _) = self.select_tasks(&mut conn, filter).await?;
        Ok(tasks)
    }

    async fn task_by_guid(&self, guid: &str) -> Result<Task> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<TaskRow> = Select::new(TABLE, COLUMNS, Filter::all().eq("guid", guid))
            .fetch_optional(&mut conn, self.dialect)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::not_found("task", guid));
        };
        match row.into_model() {
            Ok(task) => Ok(task),
            Err(e) => {
                self.delete_corrupt_task(&mut conn, guid, &e).await?;
                Err(e)
            }
        }
    }

    async fn start_task(&self, guid: &str, cell_id: &str) -> Result<Transition<Task>> {
        self.mutate_task("start_task", guid, |before, now| {
            if before.state == TaskState::Running && before.cell_id == cell_id {
                return Ok(None);
            }
            let mut after = before.clone();
            after.state = next_state(TaskAction::Start, before)?;
            after.cell_id = cell_id.to_string();
            after.updated_at = now;
            Ok(Some(after))
        })
        .await
    }

    async fn cancel_task(&self, guid: &str) -> Result<Transition<Task>> {
        self.mutate_task("cancel_task", guid, |before, now| {
            next_state(TaskAction::Cancel, before)?;
            let mut after = before.clone();
            complete_in_place(&mut after, now, true, CANCELLED_REASON, "");
            Ok(Some(after))
        })
        .await
    }

    async fn complete_task(
        &self,
        guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<Transition<Task>> {
        self.mutate_task("complete_task", guid, |before, now| {
            if before.state == TaskState::Running && before.cell_id != cell_id {
                return Err(StoreError::RunningOnDifferentCell {
                    task_guid: before.guid.clone(),
                    requested_cell: cell_id.to_string(),
                    running_cell: before.cell_id.clone(),
                });
            }
            next_state(TaskAction::Complete, before)?;
            let mut after = before.clone();
            complete_in_place(&mut after, now, failed, failure_reason, result);
            Ok(Some(after))
        })
        .await
    }

    async fn fail_task(&self, guid: &str, failure_reason: &str) -> Result<Transition<Task>> {
        self.mutate_task("fail_task", guid, |before, now| {
            next_state(TaskAction::Fail, before)?;
            let mut after = before.clone();
            complete_in_place(&mut after, now, true, failure_reason, "");
            Ok(Some(after))
        })
        .await
    }

    async fn reject_task(&self, guid: &str, reason: &str) -> Result<Transition<Task>> {
        self.mutate_task("reject_task", guid, |before, now| {
            let mut after = before.clone();
            after.state = next_state(TaskAction::Reject, before)?;
            after.rejection_count = before.rejection_count.saturating_add(1);
            after.rejection_reason = truncate_string(reason, MAX_REASON_LENGTH);
            after.cell_id.clear();
            after.updated_at = now;
            Ok(Some(after))
        })
        .await
    }

    async fn resolving_task(&self, guid: &str) -> Result<Transition<Task>> {
        self.mutate_task("resolving_task", guid, |before, now| {
            let mut after = before.clone();
            after.state = next_state(TaskAction::Resolve, before)?;
            after.updated_at = now;
            Ok(Some(after))
        })
        .await
    }

    async fn delete_task(&self, guid: &str) -> Result<Task> {
        self.transact("delete_task", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self.lock_task(&mut *tx, guid).await? else {
                tx.commit().await?;
                return Err(StoreError::not_found("task", guid));
            };
            if before.state.apply(TaskAction::Delete) != Some(TaskOutcome::Deleted) {
                return Err(illegal(TaskAction::Delete, &before));
            }

            sql::delete(&mut *tx, self.dialect, TABLE, &Filter::all().eq("guid", guid)).await?;
            tx.commit().await?;

            debug!(task_guid = %guid, "Task deleted");
            Ok(before)
        })
        .await
    }
}
