// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Actual LRP state machine over the `actual_lrps` table.

use async_trait::async_trait;
use sqlx::AnyConnection;
use tracing::{debug, info, warn};

use super::sql::{self, Filter, Select, SqlValue};
use super::{ActualLrpDb, CrashOutcome, SqlStore, SuspectPromotion};
use crate::clock::{chrono_duration, from_nanos, to_nanos};
use crate::error::{LrpAction, Result, StoreError};
use crate::models::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo,
    ActualLrpState, MAX_REASON_LENGTH, ModificationTag, Presence, Transition, truncate_string,
};

pub(crate) const TABLE: &str = "actual_lrps";

const COLUMNS: &str = "process_guid, instance_index, presence, domain, state, instance_guid, \
     cell_id, placement_error, since, net_info, crash_count, crash_reason, \
     modification_tag_epoch, modification_tag_index";

/// Raw `actual_lrps` row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ActualLrpRow {
    process_guid: String,
    instance_index: i64,
    presence: String,
    domain: String,
    state: String,
    instance_guid: String,
    cell_id: String,
    placement_error: String,
    since: i64,
    net_info: String,
    crash_count: i64,
    crash_reason: String,
    modification_tag_epoch: String,
    modification_tag_index: i64,
}

impl ActualLrpRow {
    fn row_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.process_guid, self.instance_index, self.presence
        )
    }

    fn into_model(self) -> Result<ActualLrp> {
        let row_key = self.row_key();
        let corrupt = |details: String| StoreError::Deserialize {
            resource: "actual_lrp",
            key: row_key.clone(),
            details,
        };

        let presence = self.presence.parse::<Presence>().map_err(&corrupt)?;
        let state = self.state.parse::<ActualLrpState>().map_err(&corrupt)?;
        let index = i32::try_from(self.instance_index).map_err(|e| corrupt(e.to_string()))?;
        let net_info = if self.net_info.is_empty() {
            ActualLrpNetInfo::default()
        } else {
            serde_json::from_str(&self.net_info).map_err(|e| corrupt(e.to_string()))?
        };

        Ok(ActualLrp {
            key: ActualLrpKey::new(self.process_guid, index, self.domain),
            presence,
            instance_key: ActualLrpInstanceKey::new(self.instance_guid, self.cell_id),
            net_info,
            state,
            placement_error: self.placement_error,
            crash_count: self.crash_count as i32,
            crash_reason: self.crash_reason,
            since: from_nanos(self.since),
            modification_tag: ModificationTag {
                epoch: self.modification_tag_epoch,
                index: self.modification_tag_index,
            },
        })
    }
}

fn slot_filter(process_guid: &str, index: i32, presence: Presence) -> Filter {
    Filter::all()
        .eq("process_guid", process_guid)
        .eq("instance_index", index)
        .eq("presence", presence.as_str())
}

fn encode_net_info(net_info: &ActualLrpNetInfo) -> Result<String> {
    if net_info.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(net_info)?)
}

fn mutable_columns(lrp: &ActualLrp) -> Result<Vec<(&'static str, SqlValue)>> {
    Ok(vec![
        ("presence", lrp.presence.as_str().into()),
        ("domain", (&lrp.key.domain).into()),
        ("state", lrp.state.as_str().into()),
        ("instance_guid", (&lrp.instance_key.instance_guid).into()),
        ("cell_id", (&lrp.instance_key.cell_id).into()),
        ("placement_error", (&lrp.placement_error).into()),
        ("since", to_nanos(lrp.since).into()),
        ("net_info", encode_net_info(&lrp.net_info)?.into()),
        ("crash_count", lrp.crash_count.into()),
        ("crash_reason", (&lrp.crash_reason).into()),
        ("modification_tag_epoch", (&lrp.modification_tag.epoch).into()),
        ("modification_tag_index", lrp.modification_tag.index.into()),
    ])
}

pub(crate) fn cannot_be(action: LrpAction, lrp: &ActualLrp) -> StoreError {
    StoreError::ActualLrpCannotBe {
        action,
        key: lrp.key.to_string(),
        state: lrp.state.to_string(),
    }
}

/// Extra condition re-checked under the row lock before an internal unclaim.
#[derive(Debug, Clone, Copy)]
pub(crate) enum UnclaimGuard<'a> {
    /// Row is still CRASHED and its backoff has elapsed.
    CrashedAndRestartable,
    /// Row is still CLAIMED or RUNNING on this cell.
    OnCell(&'a str),
}

impl SqlStore {
    /// Decode a row, deleting it when it is corrupt.
    pub(crate) async fn decode_actual_lrp(
        &self,
        conn: &mut AnyConnection,
        row: ActualLrpRow,
    ) -> Result<Option<ActualLrp>> {
        let filter = Filter::all()
            .eq("process_guid", &row.process_guid)
            .eq("instance_index", row.instance_index)
            .eq("presence", &row.presence);
        let row_key = row.row_key();

        match row.into_model() {
            Ok(lrp) => Ok(Some(lrp)),
            Err(e) => {
                warn!(actual_lrp = %row_key, error = %e, "Deleting corrupt actual LRP");
                sql::delete(conn, self.dialect, TABLE, &filter).await?;
                Ok(None)
            }
        }
    }

    /// Read one row `FOR UPDATE`. Corrupt rows are deleted and reported as absent.
    pub(crate) async fn lock_actual_lrp(
        &self,
        conn: &mut AnyConnection,
        process_guid: &str,
        index: i32,
        presence: Presence,
    ) -> Result<Option<ActualLrp>> {
        let row: Option<ActualLrpRow> =
            Select::new(TABLE, COLUMNS, slot_filter(process_guid, index, presence))
                .for_update()
                .fetch_optional(conn, self.dialect)
                .await?;
        match row {
            Some(row) => self.decode_actual_lrp(conn, row).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn select_actual_lrps(
        &self,
        conn: &mut AnyConnection,
        filter: Filter,
    ) -> Result<Vec<ActualLrp>> {
        let rows: Vec<ActualLrpRow> = Select::new(TABLE, COLUMNS, filter)
            .order_by("process_guid, instance_index, presence")
            .fetch_all(conn, self.dialect)
            .await?;

        let mut lrps = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(lrp) = self.decode_actual_lrp(conn, row).await? {
                lrps.push(lrp);
            }
        }
        Ok(lrps)
    }

    pub(crate) async fn insert_actual_lrp(
        &self,
        conn: &mut AnyConnection,
        lrp: &ActualLrp,
    ) -> Result<()> {
        let mut values = vec![
            ("process_guid", SqlValue::from(&lrp.key.process_guid)),
            ("instance_index", lrp.key.index.into()),
        ];
        values.extend(mutable_columns(lrp)?);
        sql::insert(conn, self.dialect, TABLE, &values)
            .await
            .map_err(|e| e.exists_as("actual_lrp", lrp.row_key()))
    }

    /// Persist `lrp` over the row currently stored under `stored_as`.
    pub(crate) async fn update_actual_lrp(
        &self,
        conn: &mut AnyConnection,
        stored_as: Presence,
        lrp: &ActualLrp,
    ) -> Result<()> {
        let filter = slot_filter(&lrp.key.process_guid, lrp.key.index, stored_as);
        let affected = sql::update(conn, self.dialect, TABLE, &mutable_columns(lrp)?, &filter)
            .await
            .map_err(|e| e.exists_as("actual_lrp", lrp.row_key()))?;
        if affected == 0 {
            return Err(StoreError::not_found("actual_lrp", lrp.row_key()));
        }
        Ok(())
    }

    pub(crate) async fn delete_actual_lrp(
        &self,
        conn: &mut AnyConnection,
        lrp: &ActualLrp,
    ) -> Result<()> {
        let filter = slot_filter(&lrp.key.process_guid, lrp.key.index, lrp.presence);
        if sql::delete(conn, self.dialect, TABLE, &filter).await? == 0 {
            return Err(StoreError::not_found("actual_lrp", lrp.row_key()));
        }
        Ok(())
    }

    /// Unclaim the ordinary row only if `guard` still holds under the row lock.
    ///
    /// Returns `None` when the row is gone or the guard no longer holds.
    pub(crate) async fn unclaim_actual_lrp_if(
        &self,
        key: &ActualLrpKey,
        guard: UnclaimGuard<'_>,
    ) -> Result<Option<Transition<ActualLrp>>> {
        self.transact("unclaim_actual_lrp_if", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Ok(None);
            };

            let holds = match guard {
                UnclaimGuard::CrashedAndRestartable => {
                    before.should_restart_crash(self.now(), &self.config.restart_calculator)
                }
                UnclaimGuard::OnCell(cell_id) => {
                    matches!(
                        before.state,
                        ActualLrpState::Claimed | ActualLrpState::Running
                    ) && before.instance_key.cell_id == cell_id
                }
            };
            if !holds {
                tx.commit().await?;
                return Ok(None);
            }

            let after = self.unclaimed_copy(&before);
            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;
            Ok(Some(Transition::changed(before, after)))
        })
        .await
    }

    fn unclaimed_copy(&self, before: &ActualLrp) -> ActualLrp {
        let mut after = before.clone();
        after.state = ActualLrpState::Unclaimed;
        after.instance_key = ActualLrpInstanceKey::default();
        after.net_info = ActualLrpNetInfo::default();
        after.since = self.now();
        after.modification_tag.increment();
        after
    }
}

#[async_trait]
impl ActualLrpDb for SqlStore {
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>> {
        let filter = Filter::all()
            .eq_opt("domain", filter.domain.as_deref())
            .eq_opt("cell_id", filter.cell_id.as_deref())
            .eq_opt("process_guid", filter.process_guid.as_deref())
            .eq_opt("instance_index", filter.index)
            .eq_opt("presence", filter.presence.map(|p| p.as_str()));

        let mut conn = self.pool.acquire().await?;
        self.select_actual_lrps(&mut conn, filter).await
    }

    async fn actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        presence: Presence,
    ) -> Result<ActualLrp> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<ActualLrpRow> =
            Select::new(TABLE, COLUMNS, slot_filter(process_guid, index, presence))
                .fetch_optional(&mut conn, self.dialect)
                .await?;
        let Some(row) = row else {
            return Err(StoreError::not_found(
                "actual_lrp",
                format!("{}/{}/{}", process_guid, index, presence),
            ));
        };

        let row_key = row.row_key();
        match self.decode_actual_lrp(&mut conn, row).await? {
            Some(lrp) => Ok(lrp),
            None => Err(StoreError::Deserialize {
                resource: "actual_lrp",
                key: row_key,
                details: "corrupt row deleted".to_string(),
            }),
        }
    }

    async fn create_unclaimed_actual_lrp(
        &self,
        key: &ActualLrpKey,
    ) -> Result<Transition<ActualLrp>> {
        self.transact("create_unclaimed_actual_lrp", move || async move {
            let lrp = ActualLrp::unclaimed(key.clone(), self.new_epoch(), self.now());
            let mut tx = self.pool.begin().await?;
            self.insert_actual_lrp(&mut *tx, &lrp).await?;
            tx.commit().await?;

            debug!(
                process_guid = %key.process_guid,
                index = key.index,
                "Created unclaimed actual LRP"
            );
            Ok(Transition::created(lrp))
        })
        .await
    }

    async fn claim_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<Transition<ActualLrp>> {
        instance_key.validate()?;

        self.transact("claim_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if !before.allows_transition_to(key, instance_key, ActualLrpState::Claimed) {
                return Err(cannot_be(LrpAction::Claimed, &before));
            }

            let mut after = before.clone();
            after.state = ActualLrpState::Claimed;
            after.instance_key = instance_key.clone();
            after.net_info = ActualLrpNetInfo::default();
            after.placement_error.clear();
            after.since = self.now();
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;

            debug!(
                process_guid = %key.process_guid,
                index = key.index,
                cell_id = %instance_key.cell_id,
                "Claimed actual LRP"
            );
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<Transition<ActualLrp>> {
        instance_key.validate()?;

        self.transact("start_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let existing = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?;

            let Some(before) = existing else {
                let mut lrp = ActualLrp::unclaimed(key.clone(), self.new_epoch(), self.now());
                lrp.state = ActualLrpState::Running;
                lrp.instance_key = instance_key.clone();
                lrp.net_info = net_info.clone();
                self.insert_actual_lrp(&mut *tx, &lrp).await?;
                tx.commit().await?;

                info!(
                    process_guid = %key.process_guid,
                    index = key.index,
                    cell_id = %instance_key.cell_id,
                    "Unknown actual LRP reported running, created"
                );
                return Ok(Transition::created(lrp));
            };

            if before.state == ActualLrpState::Running
                && before.instance_key == *instance_key
                && before.net_info == *net_info
            {
                tx.commit().await?;
                return Ok(Transition::unchanged(before));
            }

            if !before.allows_transition_to(key, instance_key, ActualLrpState::Running) {
                return Err(cannot_be(LrpAction::Started, &before));
            }

            let mut after = before.clone();
            after.state = ActualLrpState::Running;
            after.instance_key = instance_key.clone();
            after.net_info = net_info.clone();
            after.placement_error.clear();
            after.since = self.now();
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;

            debug!(
                process_guid = %key.process_guid,
                index = key.index,
                cell_id = %instance_key.cell_id,
                "Started actual LRP"
            );
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        reason: &str,
    ) -> Result<CrashOutcome> {
        instance_key.validate()?;
        let reason = truncate_string(reason, MAX_REASON_LENGTH);
        let reason = reason.as_str();

        self.transact("crash_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if !before.allows_transition_to(key, instance_key, ActualLrpState::Crashed) {
                return Err(cannot_be(LrpAction::Crashed, &before));
            }

            let now = self.now();
            let ran_long_enough = before.state == ActualLrpState::Running
                && now - before.since > chrono_duration(self.config.crash_reset_timeout);
            let crash_count = if ran_long_enough {
                1
            } else {
                before.crash_count.saturating_add(1)
            };
            let immediate_restart = self
                .config
                .restart_calculator
                .should_restart_immediately(crash_count);

            let mut after = before.clone();
            after.state = if immediate_restart {
                ActualLrpState::Unclaimed
            } else {
                ActualLrpState::Crashed
            };
            after.instance_key = ActualLrpInstanceKey::default();
            after.net_info = ActualLrpNetInfo::default();
            after.crash_count = crash_count;
            after.crash_reason = reason.to_string();
            after.since = now;
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;

            info!(
                process_guid = %key.process_guid,
                index = key.index,
                crash_count,
                immediate_restart,
                "Actual LRP crashed"
            );
            Ok(CrashOutcome {
                transition: Transition::changed(before, after),
                immediate_restart,
            })
        })
        .await
    }

    async fn fail_actual_lrp(
        &self,
        key: &ActualLrpKey,
        placement_error: &str,
    ) -> Result<Transition<ActualLrp>> {
        let placement_error = truncate_string(placement_error, MAX_REASON_LENGTH);
        let placement_error = placement_error.as_str();

        self.transact("fail_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if before.state != ActualLrpState::Unclaimed {
                return Err(cannot_be(LrpAction::Failed, &before));
            }

            let mut after = before.clone();
            after.placement_error = placement_error.to_string();
            after.since = self.now();
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>> {
        self.transact("unclaim_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if before.state == ActualLrpState::Unclaimed {
                tx.commit().await?;
                return Ok(Transition::unchanged(before));
            }
            if !before.allows_transition_to(
                key,
                &ActualLrpInstanceKey::default(),
                ActualLrpState::Unclaimed,
            ) {
                return Err(cannot_be(LrpAction::Unclaimed, &before));
            }

            let after = self.unclaimed_copy(&before);
            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn remove_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<Transition<ActualLrp>> {
        self.transact("remove_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if let Some(instance_key) = instance_key
                && before.instance_key != *instance_key
            {
                return Err(cannot_be(LrpAction::Removed, &before));
            }

            self.delete_actual_lrp(&mut *tx, &before).await?;
            tx.commit().await?;

            debug!(process_guid = %key.process_guid, index = key.index, "Removed actual LRP");
            Ok(Transition::removed(before))
        })
        .await
    }

    async fn suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>> {
        self.transact("suspect_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("actual_lrp", key.to_string()));
            };

            if before.state != ActualLrpState::Running {
                return Err(cannot_be(LrpAction::Suspected, &before));
            }
            if self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Suspect)
                .await?
                .is_some()
            {
                return Err(StoreError::ResourceExists {
                    resource: "suspect_actual_lrp",
                    key: key.to_string(),
                });
            }

            let mut after = before.clone();
            after.presence = Presence::Suspect;
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Ordinary, &after)
                .await?;
            tx.commit().await?;

            info!(
                process_guid = %key.process_guid,
                index = key.index,
                cell_id = %before.instance_key.cell_id,
                "Marked actual LRP suspect"
            );
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn unsuspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>> {
        self.transact("unsuspect_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Suspect)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("suspect_actual_lrp", key.to_string()));
            };

            if self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?
                .is_some()
            {
                return Err(StoreError::ResourceExists {
                    resource: "actual_lrp",
                    key: key.to_string(),
                });
            }

            let mut after = before.clone();
            after.presence = Presence::Ordinary;
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Suspect, &after)
                .await?;
            tx.commit().await?;
            Ok(Transition::changed(before, after))
        })
        .await
    }

    async fn promote_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<SuspectPromotion> {
        self.transact("promote_suspect_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Suspect)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("suspect_actual_lrp", key.to_string()));
            };

            let replaced = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Ordinary)
                .await?;
            if let Some(ordinary) = &replaced {
                self.delete_actual_lrp(&mut *tx, ordinary).await?;
            }

            let mut after = before.clone();
            after.presence = Presence::Ordinary;
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Suspect, &after)
                .await?;
            tx.commit().await?;

            info!(
                process_guid = %key.process_guid,
                index = key.index,
                replaced = replaced.is_some(),
                "Promoted suspect actual LRP"
            );
            Ok(SuspectPromotion {
                replaced,
                promoted: Transition::changed(before, after),
            })
        })
        .await
    }

    async fn remove_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<Transition<ActualLrp>> {
        self.transact("remove_suspect_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(&mut *tx, &key.process_guid, key.index, Presence::Suspect)
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found("suspect_actual_lrp", key.to_string()));
            };

            self.delete_actual_lrp(&mut *tx, &before).await?;
            tx.commit().await?;
            Ok(Transition::removed(before))
        })
        .await
    }

    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<Transition<ActualLrp>> {
        self.evacuate(key, instance_key, net_info).await
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<Transition<ActualLrp>> {
        self.remove_evacuating(key, instance_key).await
    }
}
