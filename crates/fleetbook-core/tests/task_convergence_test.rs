// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the task convergence pass.

mod common;

use std::time::Duration;

use common::*;
use fleetbook_core::ErrorKind;
use fleetbook_core::convergence::{TaskConvergenceConfig, TaskConvergenceResult};
use fleetbook_core::events::TaskEvent;
use fleetbook_core::models::{TaskDefinition, TaskState};
use fleetbook_core::persistence::TaskDb;

async fn desire(ctx: &TestContext, guid: &str) {
    ctx.store
        .desire_task(guid, "d1", &TaskDefinition::default())
        .await
        .expect("Failed to desire task");
}

async fn complete(ctx: &TestContext, guid: &str) {
    desire(ctx, guid).await;
    ctx.store.start_task(guid, "c1").await.unwrap();
    ctx.store
        .complete_task(guid, "c1", false, "", "done")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recent_tasks_are_left_alone() {
    let ctx = TestContext::new().await;
    desire(&ctx, "t1").await;
    complete(&ctx, "t2").await;

    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .expect("Failed to converge tasks");

    assert_eq!(result, TaskConvergenceResult::default());
    assert_eq!(ctx.metrics.gauge_value("TasksPending"), Some(1));
    assert_eq!(ctx.metrics.gauge_value("TasksCompleted"), Some(1));
}

#[tokio::test]
async fn test_stale_pending_task_is_auctioned_again() {
    let ctx = TestContext::new().await;
    desire(&ctx, "t1").await;

    ctx.advance(Duration::from_secs(31));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert_eq!(result.tasks_to_auction.len(), 1);
    assert_eq!(result.tasks_to_auction[0].guid, "t1");
    assert_eq!(result.tasks_to_auction[0].domain, "d1");
    assert!(result.events.is_empty());
    assert_eq!(ctx.metrics.counter_value("ConvergenceTasksKicked"), 1);
}

#[tokio::test]
async fn test_expired_pending_task_fails() {
    let ctx = TestContext::new().await;
    desire(&ctx, "t1").await;

    ctx.advance(Duration::from_secs(1801));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert!(result.tasks_to_auction.is_empty());
    assert_eq!(result.tasks_to_complete.len(), 1);
    let task = &result.tasks_to_complete[0];
    assert!(task.failed);
    assert_eq!(task.failure_reason, "not started within time limit");
    assert_eq!(result.events.len(), 1);
    assert!(matches!(result.events[0], TaskEvent::Changed { .. }));

    let stored = ctx.store.task_by_guid("t1").await.unwrap();
    assert_eq!(stored.state, TaskState::Completed);
}

#[tokio::test]
async fn test_running_task_on_missing_cell_fails() {
    let ctx = TestContext::new().await;
    desire(&ctx, "t1").await;
    ctx.store.start_task("t1", "c1").await.unwrap();
    desire(&ctx, "t2").await;
    ctx.store.start_task("t2", "c2").await.unwrap();

    let result = ctx
        .task_convergence()
        .converge(&cells(&["c2"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert_eq!(result.tasks_to_complete.len(), 1);
    assert_eq!(result.tasks_to_complete[0].guid, "t1");
    assert_eq!(
        result.tasks_to_complete[0].failure_reason,
        "cell disappeared before completion"
    );

    let untouched = ctx.store.task_by_guid("t2").await.unwrap();
    assert_eq!(untouched.state, TaskState::Running);
    assert_eq!(ctx.metrics.gauge_value("TasksRunning"), Some(1));
}

#[tokio::test]
async fn test_stale_completed_task_is_redelivered() {
    let ctx = TestContext::new().await;
    complete(&ctx, "t1").await;

    ctx.advance(Duration::from_secs(31));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert_eq!(result.tasks_to_complete.len(), 1);
    assert_eq!(result.tasks_to_complete[0].result, "done");
    assert!(result.events.is_empty());
}

#[tokio::test]
async fn test_stale_resolving_task_is_demoted_and_redelivered() {
    let ctx = TestContext::new().await;
    complete(&ctx, "t1").await;
    ctx.store.resolving_task("t1").await.unwrap();

    ctx.advance(Duration::from_secs(31));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert_eq!(result.tasks_to_complete.len(), 1);
    assert_eq!(result.tasks_to_complete[0].state, TaskState::Completed);
    assert_eq!(result.events.len(), 1);

    let stored = ctx.store.task_by_guid("t1").await.unwrap();
    assert_eq!(stored.state, TaskState::Completed);
}

#[tokio::test]
async fn test_expired_completed_tasks_are_deleted() {
    let ctx = TestContext::new().await;
    complete(&ctx, "t1").await;
    complete(&ctx, "t2").await;
    ctx.store.resolving_task("t2").await.unwrap();

    ctx.advance(Duration::from_secs(121));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();

    assert!(result.tasks_to_complete.is_empty());
    assert_eq!(result.events.len(), 2);
    assert!(
        result
            .events
            .iter()
            .all(|e| matches!(e, TaskEvent::Removed(_)))
    );
    assert_eq!(ctx.metrics.counter_value("ConvergenceTasksPruned"), 2);

    let err = ctx.store.task_by_guid("t1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_custom_durations() {
    let ctx = TestContext::new().await;
    desire(&ctx, "t1").await;

    let config = TaskConvergenceConfig {
        kick_task_duration: Duration::from_secs(5),
        expire_pending_task_duration: Duration::from_secs(10),
        expire_completed_task_duration: Duration::from_secs(20),
    };
    let convergence = ctx.task_convergence();

    ctx.advance(Duration::from_secs(6));
    let result = convergence.converge(&cells(&[]), &config).await.unwrap();
    assert_eq!(result.tasks_to_auction.len(), 1);

    ctx.advance(Duration::from_secs(5));
    let result = convergence.converge(&cells(&[]), &config).await.unwrap();
    assert!(result.tasks_to_auction.is_empty());
    assert_eq!(result.tasks_to_complete.len(), 1);
}
