// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;

use super::sql::{self, Filter, Select};
use super::{ConfigurationDb, SqlStore};
use crate::error::Result;

const TABLE: &str = "configurations";

#[derive(Debug, sqlx::FromRow)]
struct ConfigurationRow {
    value: String,
}

#[async_trait]
impl ConfigurationDb for SqlStore {
    async fn set_configuration_value(&self, key: &str, value: &str) -> Result<()> {
        self.transact("set_configuration_value", move || async move {
            let mut tx = self.pool.begin().await?;
            let updated = sql::update(
                &mut *tx,
                self.dialect,
                TABLE,
                &[("value", value.into())],
                &Filter::all().eq("id", key),
            )
            .await?;
            if updated == 0 {
                sql::insert(
                    &mut *tx,
                    self.dialect,
                    TABLE,
                    &[("id", key.into()), ("value", value.into())],
                )
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn configuration_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<ConfigurationRow> =
            Select::new(TABLE, "value", Filter::all().eq("id", key))
                .fetch_optional(&mut conn, self.dialect)
                .await?;
        Ok(row.map(|r| r.value))
    }
}
