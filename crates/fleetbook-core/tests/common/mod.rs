// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for fleetbook-core integration tests.
//!
//! Provides TestContext for setting up a store with a controllable clock and
//! predictable epochs, plus the convergence pieces wired to it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use fleetbook_core::clock::{FakeClock, SequentialGuidProvider};
use fleetbook_core::convergence::{
    ConvergenceConsumer, ConvergenceController, KeyToRetire, LrpConvergence,
    LrpConvergenceConfig, StartRequest, TaskConvergence, TaskStartRequest,
};
use fleetbook_core::events::{ActualLrpEvent, TaskEvent};
use fleetbook_core::metrics::RecordingMetricsSink;
use fleetbook_core::models::{
    ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, CellPresence, CellSet, DesiredLrp,
    PortMapping, Task,
};
use fleetbook_core::persistence::{DesiredLrpDb, LockDb};
use fleetbook_core::{SqlStore, StoreConfig};

/// Test context holding a migrated store and the fakes that drive it.
pub struct TestContext {
    pub store: SqlStore,
    pub clock: Arc<FakeClock>,
    pub metrics: Arc<RecordingMetricsSink>,
}

impl TestContext {
    /// Create a context backed by an in-memory SQLite database.
    ///
    /// A single connection keeps every operation on the same database.
    pub async fn new() -> Self {
        Self::with_config(StoreConfig::default()).await
    }

    /// Same as [`TestContext::new`] with custom store tunables.
    pub async fn with_config(config: StoreConfig) -> Self {
        let store = SqlStore::connect("sqlite::memory:", 1, config)
            .await
            .expect("Failed to create in-memory SQLite store");
        Self::from_store(store).await
    }

    /// Create a context against TEST_DATABASE_URL, if set.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = SqlStore::connect(&database_url, 5, StoreConfig::default())
            .await
            .ok()?;
        Some(Self::from_store(store).await)
    }

    async fn from_store(store: SqlStore) -> Self {
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = store
            .with_clock(clock.clone())
            .with_guid_provider(Arc::new(SequentialGuidProvider::new("epoch")));
        store.migrate().await.expect("Failed to run migrations");

        Self {
            store,
            clock,
            metrics: Arc::new(RecordingMetricsSink::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn lrp_convergence(&self) -> LrpConvergence {
        LrpConvergence::new(
            self.store.clone(),
            LrpConvergenceConfig::default(),
            self.metrics.clone(),
        )
    }

    pub fn task_convergence(&self) -> TaskConvergence {
        TaskConvergence::new(self.store.clone(), self.metrics.clone())
    }

    pub fn controller(
        &self,
        consumer: Arc<RecordingConsumer>,
        generate_suspects: bool,
    ) -> ConvergenceController {
        ConvergenceController::new(self.store.clone(), consumer, generate_suspects)
    }

    /// Insert a desired LRP with `instances` slots.
    pub async fn desire(&self, process_guid: &str, domain: &str, instances: i32) -> DesiredLrp {
        self.store
            .desire_lrp(&DesiredLrp::new(process_guid, domain, instances))
            .await
            .expect("Failed to desire LRP")
    }

    /// Register cells with a long TTL.
    pub async fn register_cells(&self, cell_ids: &[&str]) {
        for cell_id in cell_ids {
            let presence = CellPresence::new(*cell_id, format!("http://{}:1800", cell_id), "z1");
            self.store
                .register_cell_presence(&presence, Duration::from_secs(3600))
                .await
                .expect("Failed to register cell");
        }
    }

    pub async fn cell_set(&self) -> CellSet {
        self.store.cell_set().await.expect("Failed to read cell set")
    }
}

pub fn key(process_guid: &str, index: i32) -> ActualLrpKey {
    ActualLrpKey::new(process_guid, index, "d1")
}

pub fn instance(instance_guid: &str, cell_id: &str) -> ActualLrpInstanceKey {
    ActualLrpInstanceKey::new(instance_guid, cell_id)
}

pub fn net_info(address: &str) -> ActualLrpNetInfo {
    ActualLrpNetInfo {
        address: address.to_string(),
        instance_address: String::new(),
        ports: vec![PortMapping {
            container_port: 8080,
            host_port: 61000,
        }],
        prefer_instance_address: false,
    }
}

pub fn cells(cell_ids: &[&str]) -> CellSet {
    let mut set = CellSet::new();
    for cell_id in cell_ids {
        set.insert(CellPresence::new(*cell_id, "", "z1"));
    }
    set
}

/// Consumer that records every call.
#[derive(Default)]
pub struct RecordingConsumer {
    pub lrp_starts: Mutex<Vec<StartRequest>>,
    pub lrp_stops: Mutex<Vec<KeyToRetire>>,
    pub task_starts: Mutex<Vec<TaskStartRequest>>,
    pub task_completions: Mutex<Vec<Task>>,
    pub lrp_events: Mutex<Vec<ActualLrpEvent>>,
    pub task_events: Mutex<Vec<TaskEvent>>,
}

#[async_trait]
impl ConvergenceConsumer for RecordingConsumer {
    async fn start_lrps(&self, requests: Vec<StartRequest>) {
        self.lrp_starts.lock().unwrap().extend(requests);
    }

    async fn stop_lrps(&self, keys: Vec<KeyToRetire>) {
        self.lrp_stops.lock().unwrap().extend(keys);
    }

    async fn start_tasks(&self, requests: Vec<TaskStartRequest>) {
        self.task_starts.lock().unwrap().extend(requests);
    }

    async fn complete_tasks(&self, tasks: Vec<Task>) {
        self.task_completions.lock().unwrap().extend(tasks);
    }

    async fn publish_actual_lrp_events(&self, events: Vec<ActualLrpEvent>) {
        self.lrp_events.lock().unwrap().extend(events);
    }

    async fn publish_task_events(&self, events: Vec<TaskEvent>) {
        self.task_events.lock().unwrap().extend(events);
    }
}

/// Skip test if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
