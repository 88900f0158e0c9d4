// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TTL locks and cell presences.
//!
//! Both live in the `locks` table. A presence is a lock of type `presence`
//! keyed `cell:<cell_id>` whose value is the JSON-encoded [`CellPresence`];
//! the live cell set is every unexpired presence.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::AnyConnection;
use tracing::{debug, info, warn};

use super::sql::{self, Filter, Select};
use super::{LockDb, SqlStore};
use crate::clock::{from_nanos, time_after, to_nanos};
use crate::error::{ErrorKind, Result, StoreError};
use crate::models::{CellPresence, CellSet};

const TABLE: &str = "locks";
const COLUMNS: &str = "lock_key, owner, value, lock_type, modified_index, expires_at";

const LOCK_TYPE: &str = "lock";
const PRESENCE_TYPE: &str = "presence";

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Lock name.
    pub key: String,
    /// Current holder.
    pub owner: String,
    /// Opaque payload.
    pub value: String,
    /// `lock` or `presence`.
    pub lock_type: String,
    /// Bumped on every acquire or refresh.
    pub modified_index: i64,
    /// When the lock lapses unless refreshed.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    lock_key: String,
    owner: String,
    value: String,
    lock_type: String,
    modified_index: i64,
    expires_at: i64,
}

impl From<LockRow> for LockRecord {
    fn from(row: LockRow) -> Self {
        Self {
            key: row.lock_key,
            owner: row.owner,
            value: row.value,
            lock_type: row.lock_type,
            modified_index: row.modified_index,
            expires_at: from_nanos(row.expires_at),
        }
    }
}

fn presence_key(cell_id: &str) -> String {
    format!("cell:{}", cell_id)
}

impl SqlStore {
    async fn lock_row(&self, conn: &mut AnyConnection, key: &str) -> Result<Option<LockRecord>> {
        let row: Option<LockRow> = Select::new(TABLE, COLUMNS, Filter::all().eq("lock_key", key))
            .for_update()
            .fetch_optional(conn, self.dialect)
            .await?;
        Ok(row.map(LockRecord::from))
    }

    /// Insert, refresh, or take over an expired lock.
    ///
    /// A missing row cannot be locked, so two callers may both try to insert
    /// it. The loser re-reads once and then sees the winner's row. A second
    /// lost insert is reported as a collision.
    async fn take_lock(
        &self,
        key: &str,
        owner: &str,
        value: &str,
        lock_type: &'static str,
        ttl: Duration,
    ) -> Result<LockRecord> {
        match self.try_take_lock(key, owner, value, lock_type, ttl).await {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(
                    lock_key = %key,
                    owner = %owner,
                    "Lock row inserted concurrently, re-reading"
                );
            }
            other => return other,
        }
        self.try_take_lock(key, owner, value, lock_type, ttl)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StoreError::LockCollision {
                    key: key.to_string(),
                    owner: "unknown".to_string(),
                },
                _ => e,
            })
    }

    async fn try_take_lock(
        &self,
        key: &str,
        owner: &str,
        value: &str,
        lock_type: &'static str,
        ttl: Duration,
    ) -> Result<LockRecord> {
        self.transact("acquire_lock", move || async move {
            let now = self.now();
            let expires_at = time_after(now, ttl);

            let mut tx = self.pool.begin().await?;
            let existing = self.lock_row(&mut *tx, key).await?;

            let record = match existing {
                None => {
                    let record = LockRecord {
                        key: key.to_string(),
                        owner: owner.to_string(),
                        value: value.to_string(),
                        lock_type: lock_type.to_string(),
                        modified_index: 1,
                        expires_at,
                    };
                    sql::insert(
                        &mut *tx,
                        self.dialect,
                        TABLE,
                        &[
                            ("lock_key", key.into()),
                            ("owner", owner.into()),
                            ("value", value.into()),
                            ("lock_type", lock_type.into()),
                            ("modified_index", record.modified_index.into()),
                            ("expires_at", to_nanos(expires_at).into()),
                        ],
                    )
                    .await?;
                    record
                }
                Some(current) if current.owner == owner || current.expires_at <= now => {
                    if current.owner != owner {
                        info!(
                            lock_key = %key,
                            previous_owner = %current.owner,
                            owner = %owner,
                            "Taking over expired lock"
                        );
                    }
                    let record = LockRecord {
                        owner: owner.to_string(),
                        value: value.to_string(),
                        lock_type: lock_type.to_string(),
                        modified_index: current.modified_index + 1,
                        expires_at,
                        ..current
                    };
                    sql::update(
                        &mut *tx,
                        self.dialect,
                        TABLE,
                        &[
                            ("owner", owner.into()),
                            ("value", value.into()),
                            ("lock_type", lock_type.into()),
                            ("modified_index", record.modified_index.into()),
                            ("expires_at", to_nanos(expires_at).into()),
                        ],
                        &Filter::all().eq("lock_key", key),
                    )
                    .await?;
                    record
                }
                Some(current) => {
                    return Err(StoreError::LockCollision {
                        key: key.to_string(),
                        owner: current.owner,
                    });
                }
            };
            tx.commit().await?;
            Ok(record)
        })
        .await
    }
}

#[async_trait]
impl LockDb for SqlStore {
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockRecord> {
        if key.is_empty() || owner.is_empty() {
            return Err(StoreError::BadRequest {
                message: "lock key and owner must not be empty".to_string(),
            });
        }
        let record = self.take_lock(key, owner, "", LOCK_TYPE, ttl).await?;
        debug!(lock_key = %key, owner = %owner, index = record.modified_index, "Lock acquired");
        Ok(record)
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<()> {
        self.transact("release_lock", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(current) = self.lock_row(&mut *tx, key).await? else {
                tx.commit().await?;
                return Err(StoreError::not_found("lock", key));
            };
            if current.owner != owner {
                return Err(StoreError::LockCollision {
                    key: key.to_string(),
                    owner: current.owner,
                });
            }
            sql::delete(&mut *tx, self.dialect, TABLE, &Filter::all().eq("lock_key", key))
                .await?;
            tx.commit().await?;

            debug!(lock_key = %key, owner = %owner, "Lock released");
            Ok(())
        })
        .await
    }

    async fn register_cell_presence(&self, presence: &CellPresence, ttl: Duration) -> Result<()> {
        if presence.cell_id.is_empty() {
            return Err(StoreError::Validation {
                field: "cell_id",
                message: "must not be empty".to_string(),
            });
        }
        let key = presence_key(&presence.cell_id);
        let value = serde_json::to_string(presence)?;
        self.take_lock(&key, &presence.cell_id, &value, PRESENCE_TYPE, ttl)
            .await?;
        Ok(())
    }

    async fn cell_set(&self) -> Result<CellSet> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<LockRow> = Select::new(
            TABLE,
            COLUMNS,
            Filter::all()
                .eq("lock_type", PRESENCE_TYPE)
                .gt("expires_at", to_nanos(self.now())),
        )
        .order_by("lock_key")
        .fetch_all(&mut conn, self.dialect)
        .await?;

        let mut cells = CellSet::new();
        for row in rows {
            match serde_json::from_str::<CellPresence>(&row.value) {
                Ok(presence) => cells.insert(presence),
                Err(e) => {
                    warn!(lock_key = %row.lock_key, error = %e, "Deleting corrupt cell presence");
                    sql::delete(
                        &mut conn,
                        self.dialect,
                        TABLE,
                        &Filter::all().eq("lock_key", &row.lock_key),
                    )
                    .await?;
                }
            }
        }
        Ok(cells)
    }

    async fn prune_expired_locks(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let pruned = sql::delete(
            &mut conn,
            self.dialect,
            TABLE,
            &Filter::all().le("expires_at", to_nanos(self.now())),
        )
        .await?;
        if pruned > 0 {
            debug!(pruned, "Pruned expired locks");
        }
        Ok(pruned)
    }
}
