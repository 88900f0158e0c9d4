// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired LRP records over the `desired_lrps` table.

use async_trait::async_trait;
use sqlx::AnyConnection;
use tracing::{info, warn};

use super::sql::{self, Filter, Select, SqlValue};
use super::{DesiredLrpDb, SqlStore};
use crate::error::{Result, StoreError};
use crate::models::{
    DesiredLrp, DesiredLrpFilter, DesiredLrpSchedulingInfo, DesiredLrpUpdate, ModificationTag,
    ResourceSpec, Transition,
};

const TABLE: &str = "desired_lrps";

const SCHEDULING_COLUMNS: &str = "process_guid, domain, log_guid, annotation, instances, \
     memory_mb, disk_mb, max_pids, rootfs, placement_tags, routes, \
     modification_tag_epoch, modification_tag_index";

const COLUMNS: &str = "process_guid, domain, log_guid, annotation, instances, \
     memory_mb, disk_mb, max_pids, rootfs, placement_tags, routes, \
     modification_tag_epoch, modification_tag_index, run_info";

#[derive(Debug, sqlx::FromRow)]
struct SchedulingInfoRow {
    process_guid: String,
    domain: String,
    log_guid: String,
    annotation: String,
    instances: i64,
    memory_mb: i64,
    disk_mb: i64,
    max_pids: i64,
    rootfs: String,
    placement_tags: String,
    routes: String,
    modification_tag_epoch: String,
    modification_tag_index: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DesiredLrpRow {
    #[sqlx(flatten)]
    info: SchedulingInfoRow,
    run_info: String,
}

fn corrupt(process_guid: &str, err: impl ToString) -> StoreError {
    StoreError::Deserialize {
        resource: "desired_lrp",
        key: process_guid.to_string(),
        details: err.to_string(),
    }
}

impl SchedulingInfoRow {
    fn into_model(self) -> Result<DesiredLrpSchedulingInfo> {
        let guid = self.process_guid.as_str();
        let placement_tags =
            serde_json::from_str(&self.placement_tags).map_err(|e| corrupt(guid, e))?;
        let routes = serde_json::from_str(&self.routes).map_err(|e| corrupt(guid, e))?;
        let instances = i32::try_from(self.instances).map_err(|e| corrupt(guid, e))?;

        Ok(DesiredLrpSchedulingInfo {
            process_guid: self.process_guid,
            domain: self.domain,
            log_guid: self.log_guid,
            annotation: self.annotation,
            instances,
            resources: ResourceSpec {
                memory_mb: self.memory_mb as i32,
                disk_mb: self.disk_mb as i32,
                max_pids: self.max_pids as i32,
            },
            rootfs: self.rootfs,
            placement_tags,
            routes,
            modification_tag: ModificationTag {
                epoch: self.modification_tag_epoch,
                index: self.modification_tag_index,
            },
        })
    }
}

impl DesiredLrpRow {
    fn into_model(self) -> Result<DesiredLrp> {
        let run_info = serde_json::from_str(&self.run_info)
            .map_err(|e| corrupt(&self.info.process_guid, e))?;
        let info = self.info.into_model()?;

        Ok(DesiredLrp {
            process_guid: info.process_guid,
            domain: info.domain,
            log_guid: info.log_guid,
            annotation: info.annotation,
            instances: info.instances,
            resources: info.resources,
            rootfs: info.rootfs,
            placement_tags: info.placement_tags,
            routes: info.routes,
            run_info,
            modification_tag: info.modification_tag,
        })
    }
}

fn filter_for(filter: &DesiredLrpFilter) -> Filter {
    let mut sql_filter = Filter::all().eq_opt("domain", filter.domain.as_deref());
    if !filter.process_guids.is_empty() {
        sql_filter = sql_filter.in_list("process_guid", filter.process_guids.iter());
    }
    sql_filter
}

impl SqlStore {
    async fn delete_corrupt_desired_lrp(
        &self,
        conn: &mut AnyConnection,
        process_guid: &str,
        err: &StoreError,
    ) -> Result<()> {
        warn!(process_guid = %process_guid, error = %err, "Deleting corrupt desired LRP");
        sql::delete(
            conn,
            self.dialect,
            TABLE,
            &Filter::all().eq("process_guid", process_guid),
        )
        .await?;
        Ok(())
    }

    async fn lock_desired_lrp(
        &self,
        conn: &mut AnyConnection,
        process_guid: &str,
    ) -> Result<Option<DesiredLrp>> {
        let row: Option<DesiredLrpRow> = Select::new(
            TABLE,
            COLUMNS,
            Filter::all().eq("process_guid", process_guid),
        )
        .for_update()
        .fetch_optional(conn, self.dialect)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        match row.into_model() {
            Ok(lrp) => Ok(Some(lrp)),
            Err(e) => {
                self.delete_corrupt_desired_lrp(conn, process_guid, &e)
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl DesiredLrpDb for SqlStore {
    async fn desire_lrp(&self, lrp: &DesiredLrp) -> Result<DesiredLrp> {
        lrp.validate()?;
        let placement_tags = serde_json::to_string(&lrp.placement_tags)?;
        let routes = serde_json::to_string(&lrp.routes)?;
        let run_info = serde_json::to_string(&lrp.run_info)?;

        let (placement_tags, routes, run_info) = (&placement_tags, &routes, &run_info);
        self.transact("desire_lrp", move || async move {
            let mut stored = lrp.clone();
            stored.modification_tag = ModificationTag::new(self.new_epoch());

            let values: Vec<(&str, SqlValue)> = vec![
                ("process_guid", (&stored.process_guid).into()),
                ("domain", (&stored.domain).into()),
                ("log_guid", (&stored.log_guid).into()),
                ("annotation", (&stored.annotation).into()),
                ("instances", stored.instances.into()),
                ("memory_mb", stored.resources.memory_mb.into()),
                ("disk_mb", stored.resources.disk_mb.into()),
                ("max_pids", stored.resources.max_pids.into()),
                ("rootfs", (&stored.rootfs).into()),
                ("placement_tags", placement_tags.into()),
                ("routes", routes.into()),
                ("modification_tag_epoch", (&stored.modification_tag.epoch).into()),
                ("modification_tag_index", stored.modification_tag.index.into()),
                ("run_info", run_info.into()),
            ];

            let mut tx = self.pool.begin().await?;
            sql::insert(&mut *tx, self.dialect, TABLE, &values)
                .await
                .map_err(|e| e.exists_as("desired_lrp", &stored.process_guid))?;
            tx.commit().await?;

            info!(
                process_guid = %stored.process_guid,
                domain = %stored.domain,
                instances = stored.instances,
                "Desired LRP created"
            );
            Ok(stored)
        })
        .await
    }

    async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<Transition<DesiredLrp>> {
        self.transact("update_desired_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self.lock_desired_lrp(&mut *tx, process_guid).await? else {
                tx.commit().await?;
                return Err(StoreError::not_found("desired_lrp", process_guid));
            };

            let mut after = before.clone();
            let changed = update.apply_to(&mut after)?;
            after.modification_tag.increment();

            let values: Vec<(&str, SqlValue)> = vec![
                ("instances", after.instances.into()),
                ("routes", serde_json::to_string(&after.routes)?.into()),
                ("annotation", (&after.annotation).into()),
                ("modification_tag_index", after.modification_tag.index.into()),
            ];
            sql::update(
                &mut *tx,
                self.dialect,
                TABLE,
                &values,
                &Filter::all().eq("process_guid", process_guid),
            )
            .await?;
            tx.commit().await?;

            info!(
                process_guid = %process_guid,
                instances = after.instances,
                changed,
                "Desired LRP updated"
            );
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrp> {
        self.transact("remove_desired_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self.lock_desired_lrp(&mut *tx, process_guid).await? else {
                tx.commit().await?;
                return Err(StoreError::not_found("desired_lrp", process_guid));
            };

            let deleted = sql::delete(
                &mut *tx,
                self.dialect,
                TABLE,
                &Filter::all().eq("process_guid", process_guid),
            )
            .await?;
            if deleted == 0 {
                return Err(StoreError::not_found("desired_lrp", process_guid));
            }
            tx.commit().await?;

            info!(process_guid = %process_guid, "Desired LRP removed");
            Ok(before)
        })
        .await
    }

    async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLrp> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<DesiredLrpRow> = Select::new(
            TABLE,
            COLUMNS,
            Filter::all().eq("process_guid", process_guid),
        )
        .fetch_optional(&mut conn, self.dialect)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::not_found("desired_lrp", process_guid));
        };
        match row.into_model() {
            Ok(lrp) => Ok(lrp),
            Err(e) => {
                self.delete_corrupt_desired_lrp(&mut conn, process_guid, &e)
                    .await?;
                Err(e)
            }
        }
    }

    async fn desired_lrps(&self, filter: &DesiredLrpFilter) -> Result<Vec<DesiredLrp>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<DesiredLrpRow> = Select::new(TABLE, COLUMNS, filter_for(filter))
            .order_by("process_guid")
            .fetch_all(&mut conn, self.dialect)
            .await?;

        let mut lrps = Vec::with_capacity(rows.len());
        for row in rows {
            let process_guid = row.info.process_guid.clone();
            match row.into_model() {
                Ok(lrp) => lrps.push(lrp),
                Err(e) => {
                    self.delete_corrupt_desired_lrp(&mut conn, &process_guid, &e)
                        .await?
                }
            }
        }
        Ok(lrps)
    }

    async fn desired_lrp_scheduling_infos(
        &self,
        filter: &DesiredLrpFilter,
    ) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<SchedulingInfoRow> =
            Select::new(TABLE, SCHEDULING_COLUMNS, filter_for(filter))
                .order_by("process_guid")
                .fetch_all(&mut conn, self.dialect)
                .await?;

        let mut infos = Vec::with_capacity(rows.len());
        for row in rows {
            let process_guid = row.process_guid.clone();
            match row.into_model() {
                Ok(info) => infos.push(info),
                Err(e) => {
                    self.delete_corrupt_desired_lrp(&mut conn, &process_guid, &e)
                        .await?
                }
            }
        }
        Ok(infos)
    }
}
