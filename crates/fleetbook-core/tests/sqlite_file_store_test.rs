// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store tests against a SQLite database file.

mod common;

use common::*;
use fleetbook_core::models::{ActualLrpState, DesiredLrp, Presence};
use fleetbook_core::persistence::{ActualLrpDb, ConfigurationDb, DesiredLrpDb};
use fleetbook_core::{SqlStore, StoreConfig};

async fn open(path: &std::path::Path) -> SqlStore {
    let url = format!("sqlite:{}?mode=rwc", path.display());
    let store = SqlStore::connect(&url, 1, StoreConfig::default())
        .await
        .expect("Failed to open SQLite file");
    store.migrate().await.expect("Failed to run migrations");
    store
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("fleetbook.db");

    {
        let store = open(&path).await;
        store
            .desire_lrp(&DesiredLrp::new("g1", "d1", 1))
            .await
            .unwrap();
        store
            .start_actual_lrp(&key("g1", 0), &instance("i1", "c1"), &net_info("10.0.0.1"))
            .await
            .unwrap();
        store
            .set_configuration_value("fleetbook_version", "test")
            .await
            .unwrap();
        store.pool().close().await;
    }

    // Migrations are idempotent on an existing file
    let store = open(&path).await;
    let desired = store.desired_lrp_by_process_guid("g1").await.unwrap();
    assert_eq!(desired.instances, 1);

    let row = store
        .actual_lrp("g1", 0, Presence::Ordinary)
        .await
        .unwrap();
    assert_eq!(row.state, ActualLrpState::Running);
    assert_eq!(row.net_info, net_info("10.0.0.1"));
    assert_eq!(
        store.configuration_value("fleetbook_version").await.unwrap(),
        Some("test".to_string())
    );
}
