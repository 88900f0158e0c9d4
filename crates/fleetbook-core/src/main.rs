// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetbook Core - standalone convergence worker
//!
//! Connects to the store, applies migrations and converges the fleet on a
//! timer until interrupted. Placement and callback delivery are logged only.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use fleetbook_core::SqlStore;
use fleetbook_core::config::Config;
use fleetbook_core::convergence::{
    ConvergenceController, ConvergenceWorker, LoggingConsumer, LrpConvergence, TaskConvergence,
};
use fleetbook_core::metrics::{MetricsSink, TracingMetricsSink};
use fleetbook_core::persistence::ConfigurationDb;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetbook_core=info".parse()?),
        )
        .init();

    info!("Starting Fleetbook Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        interval_secs = config.worker.interval.as_secs(),
        workers = config.lrp_convergence.workers,
        generate_suspects = config.generate_suspect_actual_lrps,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = SqlStore::connect(
        &config.database_url,
        config.max_connections,
        config.store.clone(),
    )
    .await?;
    info!(dialect = ?store.dialect(), "Database connection established");

    info!("Running database migrations...");
    store.migrate().await?;
    info!("Migrations completed");

    store
        .set_configuration_value("fleetbook_version", env!("CARGO_PKG_VERSION"))
        .await?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);
    let lrps = LrpConvergence::new(store.clone(), config.lrp_convergence.clone(), metrics.clone());
    let tasks = TaskConvergence::new(store.clone(), metrics);
    let controller = ConvergenceController::new(
        store.clone(),
        Arc::new(LoggingConsumer),
        config.generate_suspect_actual_lrps,
    );
    let worker = Arc::new(ConvergenceWorker::new(
        store.clone(),
        lrps,
        tasks,
        controller,
        config.worker.clone(),
    ));
    let shutdown = worker.shutdown_handle();

    let worker_handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    info!("Fleetbook Core initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = worker_handle.await {
        error!("Convergence worker task failed: {}", e);
    }

    store.pool().close().await;
    info!("Shutdown complete");

    Ok(())
}
