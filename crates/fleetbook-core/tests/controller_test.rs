// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for applying convergence results.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use fleetbook_core::convergence::TaskConvergenceConfig;
use fleetbook_core::events::ActualLrpEvent;
use fleetbook_core::models::{ActualLrpFilter, ActualLrpState, Presence, TaskDefinition};
use fleetbook_core::persistence::{ActualLrpDb, TaskDb};

#[tokio::test]
async fn test_rows_on_missing_cells_are_unclaimed_and_placed() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 1).await;
    ctx.store
        .start_actual_lrp(&key("g1", 0), &instance("i1", "c1"), &net_info("10.0.0.1"))
        .await
        .unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), false);

    let result = ctx.lrp_convergence().converge(&cells(&[])).await.unwrap();
    let report = controller.handle_lrp_result(result).await;

    assert_eq!(report.start_requests.len(), 1);
    assert_eq!(report.start_requests[0].process_guid, "g1");
    assert_eq!(report.start_requests[0].indices, vec![0]);
    assert!(report.stop_requests.is_empty());
    assert_eq!(report.events.len(), 1);

    let row = ctx
        .store
        .actual_lrp("g1", 0, Presence::Ordinary)
        .await
        .unwrap();
    assert_eq!(row.state, ActualLrpState::Unclaimed);
    assert!(row.instance_key.is_empty());

    assert_eq!(consumer.lrp_starts.lock().unwrap().len(), 1);
    assert_eq!(consumer.lrp_events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_running_rows_on_missing_cells_become_suspects() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 2).await;
    ctx.store
        .start_actual_lrp(&key("g1", 0), &instance("i1", "c1"), &net_info("10.0.0.1"))
        .await
        .unwrap();
    ctx.store
        .create_unclaimed_actual_lrp(&key("g1", 1))
        .await
        .unwrap();
    ctx.store
        .claim_actual_lrp(&key("g1", 1), &instance("i2", "c1"))
        .await
        .unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), true);

    let result = ctx.lrp_convergence().converge(&cells(&[])).await.unwrap();
    let report = controller.handle_lrp_result(result).await;

    assert_eq!(report.start_requests.len(), 1);
    assert_eq!(report.start_requests[0].indices, vec![0, 1]);

    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    // Running instance is kept as a suspect next to its replacement
    let suspect = ctx
        .store
        .actual_lrp("g1", 0, Presence::Suspect)
        .await
        .unwrap();
    assert_eq!(suspect.instance_key, instance("i1", "c1"));
    let replacement = ctx
        .store
        .actual_lrp("g1", 0, Presence::Ordinary)
        .await
        .unwrap();
    assert_eq!(replacement.state, ActualLrpState::Unclaimed);

    // Claimed instance is simply unclaimed
    let claimed = ctx
        .store
        .actual_lrp("g1", 1, Presence::Ordinary)
        .await
        .unwrap();
    assert_eq!(claimed.state, ActualLrpState::Unclaimed);
}

#[tokio::test]
async fn test_retired_rows_are_removed_or_stopped() {
    let ctx = TestContext::new().await;
    ctx.store
        .create_unclaimed_actual_lrp(&key("g2", 0))
        .await
        .unwrap();
    ctx.store
        .start_actual_lrp(&key("g2", 1), &instance("i1", "c1"), &net_info("10.0.0.1"))
        .await
        .unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), false);

    let result = ctx
        .lrp_convergence()
        .converge(&cells(&["c1"]))
        .await
        .unwrap();
    let report = controller.handle_lrp_result(result).await;

    assert_eq!(report.stop_requests.len(), 1);
    assert_eq!(report.stop_requests[0].key, key("g2", 1));
    assert_eq!(report.stop_requests[0].instance_key, instance("i1", "c1"));
    assert!(matches!(report.events.as_slice(), [ActualLrpEvent::Removed(_)]));

    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, key("g2", 1));
    assert_eq!(consumer.lrp_stops.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_suspect_on_returning_cell_is_promoted() {
    let ctx = TestContext::new().await;
    ctx.desire("g1", "d1", 1).await;
    let k = key("g1", 0);
    ctx.store
        .start_actual_lrp(&k, &instance("i1", "c1"), &net_info("10.0.0.1"))
        .await
        .unwrap();
    ctx.store.suspect_actual_lrp(&k).await.unwrap();
    ctx.store.create_unclaimed_actual_lrp(&k).await.unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), true);

    let result = ctx
        .lrp_convergence()
        .converge(&cells(&["c1"]))
        .await
        .unwrap();
    assert_eq!(result.suspect_keys_with_existing_cells, vec![k.clone()]);
    let report = controller.handle_lrp_result(result).await;

    // The unclaimed replacement had nothing to stop
    assert!(report.stop_requests.is_empty());
    let removed: Vec<_> = report
        .events
        .iter()
        .filter_map(|e| match e {
            ActualLrpEvent::Removed(lrp) => Some(lrp.state),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec![ActualLrpState::Unclaimed]);

    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].presence, Presence::Ordinary);
    assert_eq!(rows[0].state, ActualLrpState::Running);
    assert_eq!(rows[0].instance_key, instance("i1", "c1"));
}

#[tokio::test]
async fn test_unneeded_suspect_is_removed() {
    let ctx = TestContext::new().await;
    let k = key("g2", 0);
    ctx.store
        .start_actual_lrp(&k, &instance("i1", "c1"), &net_info("10.0.0.1"))
        .await
        .unwrap();
    ctx.store.suspect_actual_lrp(&k).await.unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), true);

    let result = ctx.lrp_convergence().converge(&cells(&[])).await.unwrap();
    let report = controller.handle_lrp_result(result).await;

    assert_eq!(report.events.len(), 1);
    let rows = ctx
        .store
        .actual_lrps(&ActualLrpFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_task_results_reach_consumer() {
    let ctx = TestContext::new().await;
    ctx.store
        .desire_task("t1", "d1", &TaskDefinition::default())
        .await
        .unwrap();
    ctx.store
        .desire_task("t2", "d1", &TaskDefinition::default())
        .await
        .unwrap();
    ctx.store.start_task("t2", "c9").await.unwrap();
    let consumer = Arc::new(RecordingConsumer::default());
    let controller = ctx.controller(consumer.clone(), false);

    ctx.advance(Duration::from_secs(31));
    let result = ctx
        .task_convergence()
        .converge(&cells(&["c1"]), &TaskConvergenceConfig::default())
        .await
        .unwrap();
    controller.handle_task_result(result).await;

    let starts = consumer.task_starts.lock().unwrap();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].guid, "t1");
    let completions = consumer.task_completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].guid, "t2");
    assert_eq!(consumer.task_events.lock().unwrap().len(), 1);
}
