// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the convergence worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use fleetbook_core::SqlStore;
use fleetbook_core::clock::FakeClock;
use fleetbook_core::convergence::{
    CONVERGENCE_LOCK_KEY, ConvergenceConsumer, ConvergenceController, ConvergenceWorker,
    ConvergenceWorkerConfig, KeyToRetire, StartRequest, TaskConvergenceConfig, TaskStartRequest,
};
use fleetbook_core::events::{ActualLrpEvent, TaskEvent};
use fleetbook_core::models::{ActualLrpFilter, Task, TaskDefinition};
use fleetbook_core::persistence::{ActualLrpDb, LockDb, TaskDb};

fn worker_config(owner: &str) -> ConvergenceWorkerConfig {
    ConvergenceWorkerConfig {
        interval: Duration::from_millis(10),
        lock_ttl: Duration::from_secs(15),
        owner: owner.to_string(),
        task: TaskConvergenceConfig::default(),
    }
}

fn worker(ctx: &TestContext, consumer: Arc<RecordingConsumer>, owner: &str) -> ConvergenceWorker {
    ConvergenceWorker::new(
        ctx.store.clone(),
        ctx.lrp_convergence(),
        ctx.task_convergence(),
        ctx.controller(consumer, false),
        worker_config(owner),
    )
}

#[tokio::test]
async fn test_run_once_converges_and_releases_lock() {
    let ctx = TestContext::new().await;
    ctx.register_cells(&["c1"]).await;
    ctx.desire("g1", "d1", 3).await;
    let consumer = Arc::new(RecordingConsumer::default());
    let worker = worker(&ctx, consumer.clone(), "worker-a");

    let ran = worker.run_once().await.expect("Failed to run convergence");
    assert!(ran);

    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    let starts = consumer.lrp_starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].indices, vec![0, 1, 2]);

    // Lock is free for anyone once the tick is over
    ctx.store
        .acquire_lock(CONVERGENCE_LOCK_KEY, "worker-b", Duration::from_secs(15))
        .await
        .expect("Lock should have been released");
}

#[tokio::test]
async fn test_run_once_skips_when_lock_is_held() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 1).await;
    ctx.store
        .acquire_lock(CONVERGENCE_LOCK_KEY, "worker-b", Duration::from_secs(15))
        .await
        .unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let worker = worker(&ctx, consumer.clone(), "worker-a");

    let ran = worker.run_once().await.unwrap();
    assert!(!ran);
    assert!(consumer.lrp_starts.lock().unwrap().is_empty());

    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());

    // An expired lock is taken over
    ctx.advance(Duration::from_secs(16));
    assert!(worker.run_once().await.unwrap());
}

#[tokio::test]
async fn test_run_once_skips_when_lock_insert_races() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 1).await;
    // Another process inserts the lock row between our read and our insert
    sqlx::query(
        "CREATE TRIGGER rival_takes_lock BEFORE INSERT ON locks \
         WHEN NEW.owner != 'worker-b' \
         BEGIN \
           INSERT INTO locks (lock_key, owner, value, lock_type, modified_index, expires_at) \
           VALUES (NEW.lock_key, 'worker-b', '', 'lock', 1, NEW.expires_at); \
         END",
    )
    .execute(ctx.store.pool())
    .await
    .expect("Failed to create trigger");
    let consumer = Arc::new(RecordingConsumer::default());
    let worker = worker(&ctx, consumer.clone(), "worker-a");

    let ran = worker.run_once().await.expect("Lock race should not fail the tick");
    assert!(!ran);
    assert!(consumer.lrp_starts.lock().unwrap().is_empty());
}

/// Consumer whose LRP placement is slow enough for the lock to lapse and be
/// taken by `worker-b`.
struct SlowPlacement {
    store: SqlStore,
    clock: Arc<FakeClock>,
    inner: RecordingConsumer,
}

#[async_trait]
impl ConvergenceConsumer for SlowPlacement {
    async fn start_lrps(&self, requests: Vec<StartRequest>) {
        self.clock.advance(Duration::from_secs(16));
        self.store
            .acquire_lock(CONVERGENCE_LOCK_KEY, "worker-b", Duration::from_secs(15))
            .await
            .expect("Expired lock should be taken over");
        self.inner.start_lrps(requests).await;
    }

    async fn stop_lrps(&self, keys: Vec<KeyToRetire>) {
        self.inner.stop_lrps(keys).await;
    }

    async fn start_tasks(&self, requests: Vec<TaskStartRequest>) {
        self.inner.start_tasks(requests).await;
    }

    async fn complete_tasks(&self, tasks: Vec<Task>) {
        self.inner.complete_tasks(tasks).await;
    }

    async fn publish_actual_lrp_events(&self, events: Vec<ActualLrpEvent>) {
        self.inner.publish_actual_lrp_events(events).await;
    }

    async fn publish_task_events(&self, events: Vec<TaskEvent>) {
        self.inner.publish_task_events(events).await;
    }
}

#[tokio::test]
async fn test_lost_lock_stops_the_tick() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 1).await;
    ctx.store
        .desire_task("t1", "d1", &TaskDefinition::default())
        .await
        .unwrap();
    ctx.advance(Duration::from_secs(31));

    let consumer = Arc::new(SlowPlacement {
        store: ctx.store.clone(),
        clock: ctx.clock.clone(),
        inner: RecordingConsumer::default(),
    });
    let worker = ConvergenceWorker::new(
        ctx.store.clone(),
        ctx.lrp_convergence(),
        ctx.task_convergence(),
        ConvergenceController::new(ctx.store.clone(), consumer.clone(), false),
        worker_config("worker-a"),
    );

    let ran = worker.run_once().await.unwrap();
    assert!(!ran);
    assert_eq!(consumer.inner.lrp_starts.lock().unwrap().len(), 1);
    // The task pass never ran
    assert!(consumer.inner.task_starts.lock().unwrap().is_empty());

    // The new owner keeps its lock
    let err = ctx
        .store
        .acquire_lock(CONVERGENCE_LOCK_KEY, "worker-a", Duration::from_secs(15))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "LOCK_COLLISION");
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let ctx = TestContext::new().await;
    let consumer = Arc::new(RecordingConsumer::default());
    let worker = Arc::new(worker(&ctx, consumer, "worker-a"));
    let shutdown = worker.shutdown_handle();

    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Worker did not stop")
        .expect("Worker task panicked");
}
