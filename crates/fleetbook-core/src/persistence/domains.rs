// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain freshness over the `domains` table.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::sql::{self, Filter, Select};
use super::{DomainDb, SqlStore};
use crate::clock::{time_after, to_nanos};
use crate::error::Result;

const TABLE: &str = "domains";

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    domain: String,
}

#[async_trait]
impl DomainDb for SqlStore {
    async fn upsert_domain(&self, domain: &str, ttl: Duration) -> Result<()> {
        let expire_time = if ttl.is_zero() {
            i64::MAX
        } else {
            to_nanos(time_after(self.now(), ttl))
        };

        self.transact("upsert_domain", move || async move {
            let mut tx = self.pool.begin().await?;
            let existing: Option<DomainRow> = Select::new(
                TABLE,
                "domain",
                Filter::all().eq("domain", domain),
            )
            .for_update()
            .fetch_optional(&mut *tx, self.dialect)
            .await?;

            if existing.is_some() {
                sql::update(
                    &mut *tx,
                    self.dialect,
                    TABLE,
                    &[("expire_time", expire_time.into())],
                    &Filter::all().eq("domain", domain),
                )
                .await?;
            } else {
                sql::insert(
                    &mut *tx,
                    self.dialect,
                    TABLE,
                    &[("domain", domain.into()), ("expire_time", expire_time.into())],
                )
                .await?;
            }
            tx.commit().await?;

            debug!(domain = %domain, ttl_secs = ttl.as_secs(), "Domain upserted");
            Ok(())
        })
        .await
    }

    async fn fresh_domains(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<DomainRow> = Select::new(
            TABLE,
            "domain",
            Filter::all().gt("expire_time", to_nanos(self.now())),
        )
        .order_by("domain")
        .fetch_all(&mut conn, self.dialect)
        .await?;
        Ok(rows.into_iter().map(|r| r.domain).collect())
    }

    async fn prune_expired_domains(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let pruned = sql::delete(
            &mut conn,
            self.dialect,
            TABLE,
            &Filter::all().le("expire_time", to_nanos(self.now())),
        )
        .await?;
        if pruned > 0 {
            debug!(pruned, "Pruned expired domains");
        }
        Ok(pruned)
    }
}
