// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Evacuating presence: instances that keep serving from a draining cell
//! while their ordinary slot is placed elsewhere.

use tracing::debug;

use super::SqlStore;
use super::actual_lrps::cannot_be;
use crate::error::{LrpAction, Result, StoreError};
use crate::models::{
    ActualLrp, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, Presence,
    Transition,
};

impl SqlStore {
    pub(crate) async fn evacuate(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<Transition<ActualLrp>> {
        if instance_key.is_empty() {
            return Err(StoreError::BadRequest {
                message: "evacuating instance must carry an instance key".to_string(),
            });
        }

        self.transact("evacuate_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let existing = self
                .lock_actual_lrp(
                    &mut *tx,
                    &key.process_guid,
                    key.index,
                    Presence::Evacuating,
                )
                .await?;

            let Some(before) = existing else {
                let mut lrp = ActualLrp::unclaimed(key.clone(), self.new_epoch(), self.now());
                lrp.presence = Presence::Evacuating;
                lrp.state = ActualLrpState::Running;
                lrp.instance_key = instance_key.clone();
                lrp.net_info = net_info.clone();
                self.insert_actual_lrp(&mut *tx, &lrp).await?;
                tx.commit().await?;

                debug!(
                    process_guid = %key.process_guid,
                    index = key.index,
                    cell_id = %instance_key.cell_id,
                    "Created evacuating actual LRP"
                );
                return Ok(Transition::created(lrp));
            };

            if before.instance_key == *instance_key && before.net_info == *net_info {
                tx.commit().await?;
                return Ok(Transition::unchanged(before));
            }

            let mut after = before.clone();
            after.instance_key = instance_key.clone();
            after.net_info = net_info.clone();
            after.since = self.now();
            after.modification_tag.increment();

            self.update_actual_lrp(&mut *tx, Presence::Evacuating, &after)
                .await?;
            tx.commit().await?;
            Ok(Transition::changed(before, after))
        })
        .await
    }

    pub(crate) async fn remove_evacuating(
        &self,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<Transition<ActualLrp>> {
        self.transact("remove_evacuating_actual_lrp", move || async move {
            let mut tx = self.pool.begin().await?;
            let Some(before) = self
                .lock_actual_lrp(
                    &mut *tx,
                    &key.process_guid,
                    key.index,
                    Presence::Evacuating,
                )
                .await?
            else {
                tx.commit().await?;
                return Err(StoreError::not_found(
                    "evacuating_actual_lrp",
                    key.to_string(),
                ));
            };

            if let Some(instance_key) = instance_key
                && before.instance_key != *instance_key
            {
                return Err(cannot_be(LrpAction::Evacuated, &before));
            }

            self.delete_actual_lrp(&mut *tx, &before).await?;
            tx.commit().await?;
            Ok(Transition::removed(before))
        })
        .await
    }
}
