// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that runs convergence on a timer.
//!
//! Every tick the worker:
//! 1. Takes the convergence lock, skipping the tick if another process holds it
//! 2. Prunes expired locks and presences
//! 3. Reads the live cell set
//! 4. Runs the LRP pass and hands its result to the controller
//! 5. Refreshes the lock, abandoning the tick if it was taken over
//! 6. Runs the task pass and hands its result to the controller
//! 7. Releases the lock

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::controller::ConvergenceController;
use super::lrp::LrpConvergence;
use super::task::{TaskConvergence, TaskConvergenceConfig};
use crate::error::{ErrorKind, Result};
use crate::persistence::{LockDb, SqlStore};

/// Lock that keeps two processes from converging at the same time.
pub const CONVERGENCE_LOCK_KEY: &str = "convergence";

/// Configuration for the convergence worker.
#[derive(Debug, Clone)]
pub struct ConvergenceWorkerConfig {
    /// Time between passes.
    pub interval: Duration,
    /// TTL of the convergence lock.
    pub lock_ttl: Duration,
    /// Identity used as the lock owner.
    pub owner: String,
    /// Durations for the task pass.
    pub task: TaskConvergenceConfig,
}

impl Default for ConvergenceWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(15),
            owner: Uuid::new_v4().to_string(),
            task: TaskConvergenceConfig::default(),
        }
    }
}

/// Background worker that runs both convergence passes.
pub struct ConvergenceWorker {
    store: SqlStore,
    lrps: LrpConvergence,
    tasks: TaskConvergence,
    controller: ConvergenceController,
    config: ConvergenceWorkerConfig,
    shutdown: Arc<Notify>,
}

impl ConvergenceWorker {
    /// Create a new convergence worker.
    pub fn new(
        store: SqlStore,
        lrps: LrpConvergence,
        tasks: TaskConvergence,
        controller: ConvergenceController,
        config: ConvergenceWorkerConfig,
    ) -> Self {
        Self {
            store,
            lrps,
            tasks,
            controller,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            owner = %self.config.owner,
            "Convergence worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Convergence worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Convergence pass failed");
                    }
                }
            }
        }

        info!("Convergence worker stopped");
    }

    /// Run one tick. Returns false when another process holds the lock or
    /// takes it over before the tick finishes.
    pub async fn run_once(&self) -> Result<bool> {
        match self
            .store
            .acquire_lock(CONVERGENCE_LOCK_KEY, &self.config.owner, self.config.lock_ttl)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::LockCollision => {
                debug!(error = %e, "Convergence lock held elsewhere, skipping tick");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let outcome = self.converge().await;
        if let Ok(false) = outcome {
            return Ok(false);
        }

        if let Err(e) = self
            .store
            .release_lock(CONVERGENCE_LOCK_KEY, &self.config.owner)
            .await
        {
            warn!(error = %e, "Failed to release convergence lock");
        }
        outcome
    }

    /// Both passes under the lock. Returns false when the lock was lost midway.
    async fn converge(&self) -> Result<bool> {
        self.store.prune_expired_locks().await?;
        let cells = self.store.cell_set().await?;

        let lrp_result = self.lrps.converge(&cells).await?;
        self.controller.handle_lrp_result(lrp_result).await;

        match self
            .store
            .acquire_lock(CONVERGENCE_LOCK_KEY, &self.config.owner, self.config.lock_ttl)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::LockCollision => {
                warn!(error = %e, "Convergence lock taken over mid-tick, skipping task pass");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let task_result = self.tasks.converge(&cells, &self.config.task).await?;
        self.controller.handle_task_result(task_result).await;
        Ok(true)
    }
}
