// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the task state machine.

mod common;

use std::time::Duration;

use common::*;
use fleetbook_core::ErrorKind;
use fleetbook_core::models::{TaskDefinition, TaskFilter, TaskState};
use fleetbook_core::persistence::TaskDb;

fn definition() -> TaskDefinition {
    TaskDefinition {
        rootfs: "docker:///busybox".to_string(),
        action: serde_json::json!({"run": {"path": "/bin/true"}}),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_task_happy_path() {
    let ctx = TestContext::new().await;

    let task = ctx
        .store
        .desire_task("t1", "d1", &definition())
        .await
        .expect("Failed to desire task");
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.created_at, task.updated_at);

    ctx.advance(Duration::from_secs(1));
    let started = ctx.store.start_task("t1", "c1").await.unwrap();
    let task = started.after.unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.cell_id, "c1");

    ctx.advance(Duration::from_secs(1));
    let completed = ctx
        .store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .unwrap();
    let task = completed.after.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.result, "ok");
    assert!(!task.failed);
    assert!(task.cell_id.is_empty());
    let first_completed_at = task.first_completed_at.expect("first_completed_at set");

    ctx.advance(Duration::from_secs(1));
    let resolving = ctx.store.resolving_task("t1").await.unwrap();
    let task = resolving.after.unwrap();
    assert_eq!(task.state, TaskState::Resolving);
    assert_eq!(task.first_completed_at, Some(first_completed_at));

    let deleted = ctx.store.delete_task("t1").await.unwrap();
    assert_eq!(deleted.guid, "t1");

    let err = ctx.store.task_by_guid("t1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_desire_task_validates_and_rejects_duplicates() {
    let ctx = TestContext::new().await;

    let err = ctx.store.desire_task("", "d1", &definition()).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    let err = ctx.store.desire_task("t1", "", &definition()).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    let err = ctx
        .store
        .desire_task("t1", "d1", &definition())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RESOURCE_EXISTS");
}

#[tokio::test]
async fn test_start_is_idempotent_for_same_cell() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();

    let again = ctx.store.start_task("t1", "c1").await.unwrap();
    assert!(again.is_noop());

    let err = ctx.store.start_task("t1", "c2").await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_complete_twice_is_invalid() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();
    ctx.store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .unwrap();

    let err = ctx
        .store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_complete_from_other_cell_is_refused() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();

    let err = ctx
        .store
        .complete_task("t1", "c2", false, "", "ok")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RUNNING_ON_DIFFERENT_CELL");

    let task = ctx.store.task_by_guid("t1").await.unwrap();
    assert_eq!(task.state, TaskState::Running);
}

#[tokio::test]
async fn test_complete_from_pending() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();

    ctx.advance(Duration::from_secs(5));
    let completed = ctx
        .store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .expect("Pending task should complete");
    let task = completed.after.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.result, "ok");
    assert!(task.cell_id.is_empty());
    assert!(task.first_completed_at.is_some());

    // Completing again is still refused
    let err = ctx
        .store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();

    let cancelled = ctx.store.cancel_task("t1").await.unwrap();
    let task = cancelled.after.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.failed);
    assert_eq!(task.failure_reason, "task was cancelled");

    let err = ctx.store.cancel_task("t1").await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_fail_running_task_truncates_reason() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();

    let failed = ctx
        .store
        .fail_task("t1", &"y".repeat(2000))
        .await
        .unwrap();
    let task = failed.after.unwrap();
    assert!(task.failed);
    assert_eq!(task.failure_reason.len(), 1024);
    assert!(task.failure_reason.ends_with("(truncated)"));
}

#[tokio::test]
async fn test_reject_returns_to_pending() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();

    let rejected = ctx
        .store
        .reject_task("t1", "insufficient resources")
        .await
        .unwrap();
    let task = rejected.after.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.rejection_count, 1);
    assert_eq!(task.rejection_reason, "insufficient resources");
    assert!(task.cell_id.is_empty());

    ctx.store.reject_task("t1", "still no room").await.unwrap();
    let task = ctx.store.task_by_guid("t1").await.unwrap();
    assert_eq!(task.rejection_count, 2);
}

#[tokio::test]
async fn test_reject_resolving_is_bad_request() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.start_task("t1", "c1").await.unwrap();
    ctx.store
        .complete_task("t1", "c1", false, "", "ok")
        .await
        .unwrap();
    ctx.store.resolving_task("t1").await.unwrap();

    let err = ctx.store.reject_task("t1", "late").await.unwrap_err();
    assert_eq!(err.error_code(), "BAD_REQUEST");

    let task = ctx.store.task_by_guid("t1").await.unwrap();
    assert_eq!(task.state, TaskState::Resolving);
    assert_eq!(task.rejection_count, 0);
}

#[tokio::test]
async fn test_delete_requires_resolving() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();

    let err = ctx.store.delete_task("t1").await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");

    let err = ctx.store.delete_task("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_task_filters() {
    let ctx = TestContext::new().await;
    ctx.store.desire_task("t1", "d1", &definition()).await.unwrap();
    ctx.store.desire_task("t2", "d1", &definition()).await.unwrap();
    ctx.store.desire_task("t3", "d2", &definition()).await.unwrap();
    ctx.store.start_task("t2", "c1").await.unwrap();

    let d1 = ctx
        .store
        .tasks(&TaskFilter {
            domain: Some("d1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(d1.len(), 2);

    let on_c1 = ctx
        .store
        .tasks(&TaskFilter {
            cell_id: Some("c1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_c1.len(), 1);
    assert_eq!(on_c1[0].guid, "t2");

    let pending = ctx
        .store
        .tasks(&TaskFilter {
            state: Some(TaskState::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let fetched = ctx.store.task_by_guid("t3").await.unwrap();
    assert_eq!(fetched.definition, definition());
}
