// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage access layer and the record stores built on it.
//!
//! [`SqlStore`] runs every operation over a single `sqlx::AnyPool`, so the
//! same code serves PostgreSQL and SQLite; [`Dialect`] covers the few places
//! where the two differ. Mutations follow one shape: begin a transaction,
//! read the target row `FOR UPDATE`, validate, write, commit. Transactions
//! that hit a deadlock are retried a bounded number of times.

mod actual_lrps;
mod configurations;
mod desired_lrps;
mod domains;
mod evacuation;
mod locks;
pub mod sql;
mod tasks;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::warn;

use crate::clock::{Clock, GuidProvider, SystemClock, UuidGuidProvider};
use crate::error::{Result, StoreError};
use crate::models::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, CellPresence,
    CellSet, DesiredLrp, DesiredLrpFilter, DesiredLrpSchedulingInfo, DesiredLrpUpdate,
    RestartCalculator, Task, TaskDefinition, TaskFilter, Transition,
};

pub use self::locks::LockRecord;
pub(crate) use self::actual_lrps::UnclaimGuard;
pub(crate) use self::tasks::TaskFix;

/// SQL flavour of the connected database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL.
    Postgres,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(StoreError::Validation {
                field: "database_url",
                message: "expected a postgres:// or sqlite: URL".to_string(),
            })
        }
    }

    /// Rewrite `?` placeholders into the dialect's form. Quoted literals are left alone.
    pub fn rebind(&self, sql: &str) -> String {
        if *self == Dialect::Sqlite {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut in_literal = false;
        let mut n = 0;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }

    /// Suffix that turns a `SELECT` into a locking read.
    ///
    /// SQLite write transactions already hold the database lock, so it gets none.
    pub fn lock_clause(&self) -> &'static str {
        match self {
            Dialect::Postgres => " FOR UPDATE",
            Dialect::Sqlite => "",
        }
    }
}

/// Tunables for [`SqlStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Attempts per transaction when the database reports a deadlock.
    pub max_deadlock_retries: u32,
    /// Pause between deadlock retries.
    pub deadlock_retry_backoff: Duration,
    /// A crash this long after the last transition out of RUNNING resets the crash count.
    pub crash_reset_timeout: Duration,
    /// Crash restart policy.
    pub restart_calculator: RestartCalculator,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_deadlock_retries: 3,
            deadlock_retry_backoff: Duration::from_millis(500),
            crash_reset_timeout: Duration::from_secs(300),
            restart_calculator: RestartCalculator::default(),
        }
    }
}

/// Result of a crash report.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashOutcome {
    /// Row before and after the crash.
    pub transition: Transition<ActualLrp>,
    /// True when the row went straight back to UNCLAIMED and should be placed again now.
    pub immediate_restart: bool,
}

/// Result of promoting a suspect row.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspectPromotion {
    /// Ordinary row deleted to make room, if one existed.
    pub replaced: Option<ActualLrp>,
    /// The suspect row before and after it became ordinary.
    pub promoted: Transition<ActualLrp>,
}

/// Actual LRP state machine and reads.
#[async_trait]
pub trait ActualLrpDb: Send + Sync {
    /// List rows matching `filter`, ordered by guid, index and presence.
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>>;

    /// Fetch one row of the slot.
    async fn actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        presence: crate::models::Presence,
    ) -> Result<ActualLrp>;

    /// Insert an ordinary UNCLAIMED row with a fresh epoch.
    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey)
    -> Result<Transition<ActualLrp>>;

    /// Hand the slot to a cell.
    async fn claim_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<Transition<ActualLrp>>;

    /// Record that an instance is running. Creates the row if it is unknown.
    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<Transition<ActualLrp>>;

    /// Record a crash and decide between immediate restart and backoff.
    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        reason: &str,
    ) -> Result<CrashOutcome>;

    /// Record a placement failure on an UNCLAIMED row.
    async fn fail_actual_lrp(
        &self,
        key: &ActualLrpKey,
        placement_error: &str,
    ) -> Result<Transition<ActualLrp>>;

    /// Release the slot back to UNCLAIMED.
    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>>;

    /// Delete the ordinary row. When `instance_key` is given it must match.
    async fn remove_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<Transition<ActualLrp>>;

    /// Turn the ordinary RUNNING row into a suspect.
    async fn suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>>;

    /// Turn the suspect row back into the ordinary one.
    async fn unsuspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>>;

    /// Replace the ordinary row with the suspect.
    async fn promote_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<SuspectPromotion>;

    /// Delete the suspect row.
    async fn remove_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>>;

    /// Record an instance that keeps running on a draining cell.
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<Transition<ActualLrp>>;

    /// Delete the evacuating row. When `instance_key` is given it must match.
    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<Transition<ActualLrp>>;
}

/// Desired LRP records.
#[async_trait]
pub trait DesiredLrpDb: Send + Sync {
    /// Validate and insert, assigning a fresh modification tag.
    async fn desire_lrp(&self, lrp: &DesiredLrp) -> Result<DesiredLrp>;

    /// Apply `update`, bumping the tag when something changed.
    async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<Transition<DesiredLrp>>;

    /// Delete. Actual rows stay behind and are retired by convergence.
    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrp>;

    /// Fetch one record.
    async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLrp>;

    /// List records.
    async fn desired_lrps(&self, filter: &DesiredLrpFilter) -> Result<Vec<DesiredLrp>>;

    /// List records without their run specs.
    async fn desired_lrp_scheduling_infos(
        &self,
        filter: &DesiredLrpFilter,
    ) -> Result<Vec<DesiredLrpSchedulingInfo>>;
}

/// Task state machine and reads.
#[async_trait]
pub trait TaskDb: Send + Sync {
    /// Insert a PENDING task.
    async fn desire_task(
        &self,
        guid: &str,
        domain: &str,
        definition: &TaskDefinition,
    ) -> Result<Task>;

    /// List tasks.
    async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Fetch one task.
    async fn task_by_guid(&self, guid: &str) -> Result<Task>;

    /// Start on `cell_id`. Repeating the call from the same cell is a no-op.
    async fn start_task(&self, guid: &str, cell_id: &str) -> Result<Transition<Task>>;

    /// Complete as failed with reason "task was cancelled".
    async fn cancel_task(&self, guid: &str) -> Result<Transition<Task>>;

    /// Report the result from the owning cell.
    async fn complete_task(
        &self,
        guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<Transition<Task>>;

    /// Complete as failed regardless of cell.
    async fn fail_task(&self, guid: &str, failure_reason: &str) -> Result<Transition<Task>>;

    /// Send the task back to PENDING and count the rejection.
    async fn reject_task(&self, guid: &str, reason: &str) -> Result<Transition<Task>>;

    /// Mark the completion callback as in flight.
    async fn resolving_task(&self, guid: &str) -> Result<Transition<Task>>;

    /// Delete a RESOLVING task.
    async fn delete_task(&self, guid: &str) -> Result<Task>;
}

/// Domain freshness.
#[async_trait]
pub trait DomainDb: Send + Sync {
    /// Mark `domain` fresh for `ttl`. A zero TTL never expires.
    async fn upsert_domain(&self, domain: &str, ttl: Duration) -> Result<()>;

    /// Domains whose freshness has not expired, sorted.
    async fn fresh_domains(&self) -> Result<Vec<String>>;

    /// Delete expired domains, returning how many were removed.
    async fn prune_expired_domains(&self) -> Result<u64>;
}

/// Locks and cell presences.
#[async_trait]
pub trait LockDb: Send + Sync {
    /// Take, refresh or take over an expired lock.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockRecord>;

    /// Release a lock held by `owner`.
    async fn release_lock(&self, key: &str, owner: &str) -> Result<()>;

    /// Register or refresh a cell.
    async fn register_cell_presence(&self, presence: &CellPresence, ttl: Duration) -> Result<()>;

    /// Live cells.
    async fn cell_set(&self) -> Result<CellSet>;

    /// Delete expired locks and presences.
    async fn prune_expired_locks(&self) -> Result<u64>;
}

/// Key-value settings.
#[async_trait]
pub trait ConfigurationDb: Send + Sync {
    /// Set `key`.
    async fn set_configuration_value(&self, key: &str, value: &str) -> Result<()>;

    /// Read `key`.
    async fn configuration_value(&self, key: &str) -> Result<Option<String>>;
}

/// SQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    clock: Arc<dyn Clock>,
    guids: Arc<dyn GuidProvider>,
    config: StoreConfig,
}

impl SqlStore {
    /// Wrap an existing pool.
    pub fn new(pool: AnyPool, dialect: Dialect, config: StoreConfig) -> Self {
        Self {
            pool,
            dialect,
            clock: Arc::new(SystemClock),
            guids: Arc::new(UuidGuidProvider),
            config,
        }
    }

    /// Connect to `url` and wrap the pool.
    ///
    /// In-memory SQLite databases are per connection, so use a single
    /// connection for `sqlite::memory:`.
    pub async fn connect(url: &str, max_connections: u32, config: StoreConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;
        Ok(Self::new(pool, dialect, config))
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the epoch generator.
    pub fn with_guid_provider(mut self, guids: Arc<dyn GuidProvider>) -> Self {
        self.guids = guids;
        self
    }

    /// Apply the embedded schema for this store's dialect.
    pub async fn migrate(&self) -> Result<()> {
        crate::migrations::run(&self.pool, self.dialect)
            .await
            .map_err(|e| StoreError::Database {
                operation: "migrate".to_string(),
                details: e.to_string(),
            })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Dialect of the connected database.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Store tunables.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub(crate) fn new_epoch(&self) -> String {
        self.guids.next_guid()
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// runs out of deadlock retries.
    ///
    /// Each call of `attempt` must open and commit its own transaction.
    pub(crate) async fn transact<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_deadlock_retries.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && tries < max_attempts => {
                    warn!(
                        operation,
                        attempt = tries,
                        error = %e,
                        "Transaction deadlocked, retrying"
                    );
                    tokio::time::sleep(self.config.deadlock_retry_backoff).await;
                }
                Err(e) => return Err(e.during(operation)),
            }
        }
    }
}
