// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Acting on convergence results.
//!
//! Passes only decide. The controller applies the decisions that need the
//! store (unclaiming rows on missing cells, removing retired rows that have no
//! instance, cleaning up suspects) and hands everything that needs the outside
//! world to a [`ConvergenceConsumer`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::lrp::{KeyToRetire, KeyWithMissingCell, LrpConvergenceResult, StartRequest};
use super::task::{TaskConvergenceResult, TaskStartRequest};
use crate::events::{ActualLrpEvent, TaskEvent};
use crate::models::{ActualLrpState, DesiredLrpSchedulingInfo, Task};
use crate::persistence::{ActualLrpDb, SqlStore, UnclaimGuard};

/// The placement and delivery side of the system.
#[async_trait]
pub trait ConvergenceConsumer: Send + Sync {
    /// Place these LRP instances.
    async fn start_lrps(&self, requests: Vec<StartRequest>);

    /// Stop these instances on their cells.
    async fn stop_lrps(&self, keys: Vec<KeyToRetire>);

    /// Auction these tasks again.
    async fn start_tasks(&self, requests: Vec<TaskStartRequest>);

    /// Deliver completion callbacks for these tasks.
    async fn complete_tasks(&self, tasks: Vec<Task>);

    /// Publish actual LRP changes.
    async fn publish_actual_lrp_events(&self, events: Vec<ActualLrpEvent>);

    /// Publish task changes.
    async fn publish_task_events(&self, events: Vec<TaskEvent>);
}

/// Consumer that only logs what it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConsumer;

#[async_trait]
impl ConvergenceConsumer for LoggingConsumer {
    async fn start_lrps(&self, requests: Vec<StartRequest>) {
        for request in &requests {
            info!(
                process_guid = %request.process_guid,
                domain = %request.domain,
                indices = ?request.indices,
                "LRP start requested"
            );
        }
    }

    async fn stop_lrps(&self, keys: Vec<KeyToRetire>) {
        for key in &keys {
            info!(
                actual_lrp = %key.key,
                cell_id = %key.instance_key.cell_id,
                "LRP stop requested"
            );
        }
    }

    async fn start_tasks(&self, requests: Vec<TaskStartRequest>) {
        for request in &requests {
            info!(task_guid = %request.guid, domain = %request.domain, "Task start requested");
        }
    }

    async fn complete_tasks(&self, tasks: Vec<Task>) {
        for task in &tasks {
            info!(task_guid = %task.guid, failed = task.failed, "Task completion requested");
        }
    }

    async fn publish_actual_lrp_events(&self, events: Vec<ActualLrpEvent>) {
        debug!(count = events.len(), "Actual LRP events");
    }

    async fn publish_task_events(&self, events: Vec<TaskEvent>) {
        debug!(count = events.len(), "Task events");
    }
}

/// What the controller did with one LRP result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerReport {
    /// Start requests handed to the consumer.
    pub start_requests: Vec<StartRequest>,
    /// Stop requests handed to the consumer.
    pub stop_requests: Vec<KeyToRetire>,
    /// Events published, including the pass's own.
    pub events: Vec<ActualLrpEvent>,
}

/// Applies convergence results.
pub struct ConvergenceController {
    store: SqlStore,
    consumer: Arc<dyn ConvergenceConsumer>,
    generate_suspects: bool,
}

impl ConvergenceController {
    /// Create a controller. With `generate_suspects`, RUNNING instances on
    /// missing cells are kept as suspects while a replacement is placed.
    pub fn new(
        store: SqlStore,
        consumer: Arc<dyn ConvergenceConsumer>,
        generate_suspects: bool,
    ) -> Self {
        Self {
            store,
            consumer,
            generate_suspects,
        }
    }

    /// Apply an LRP pass result and notify the consumer.
    pub async fn handle_lrp_result(&self, result: LrpConvergenceResult) -> ControllerReport {
        let mut infos: BTreeMap<String, DesiredLrpSchedulingInfo> = BTreeMap::new();
        let mut starts: BTreeMap<String, BTreeSet<i32>> = BTreeMap::new();
        let mut start_templates: BTreeMap<String, StartRequest> = BTreeMap::new();
        for request in result.start_requests {
            starts
                .entry(request.process_guid.clone())
                .or_default()
                .extend(request.indices.iter().copied());
            start_templates.insert(request.process_guid.clone(), request);
        }

        let mut events = result.events;
        let mut stops = Vec::new();

        for missing in result.keys_with_missing_cells {
            let key = missing.actual_lrp.key.clone();
            if self.replace_missing(&missing, &mut events).await {
                starts
                    .entry(key.process_guid.clone())
                    .or_default()
                    .insert(key.index);
                infos.insert(key.process_guid, missing.scheduling_info);
            }
        }

        for retire in result.keys_to_retire {
            if !retire.instance_key.is_empty() {
                stops.push(retire);
                continue;
            }
            match self.store.remove_actual_lrp(&retire.key, None).await {
                Ok(transition) => events.extend(ActualLrpEvent::from_transition(transition)),
                Err(e) => {
                    warn!(actual_lrp = %retire.key, error = %e, "Failed to retire actual LRP");
                }
            }
        }

        for key in result.suspect_keys_to_retire {
            match self.store.remove_suspect_actual_lrp(&key).await {
                Ok(transition) => events.extend(ActualLrpEvent::from_transition(transition)),
                Err(e) => {
                    warn!(actual_lrp = %key, error = %e, "Failed to remove suspect actual LRP");
                }
            }
        }

        for key in result.suspect_keys_with_existing_cells {
            match self.store.promote_suspect_actual_lrp(&key).await {
                Ok(promotion) => {
                    if let Some(replaced) = promotion.replaced {
                        if !replaced.instance_key.is_empty() {
                            stops.push(KeyToRetire::from(&replaced));
                        }
                        events.push(ActualLrpEvent::Removed(replaced));
                    }
                    events.extend(ActualLrpEvent::from_transition(promotion.promoted));
                }
                Err(e) => {
                    warn!(actual_lrp = %key, error = %e, "Failed to promote suspect actual LRP");
                }
            }
        }

        let start_requests: Vec<StartRequest> = starts
            .into_iter()
            .filter_map(|(process_guid, indices)| {
                let indices: Vec<i32> = indices.into_iter().collect();
                match start_templates.remove(&process_guid) {
                    Some(mut request) => {
                        request.indices = indices;
                        Some(request)
                    }
                    None => infos
                        .get(&process_guid)
                        .map(|info| StartRequest::new(info, indices)),
                }
            })
            .collect();

        if !start_requests.is_empty() {
            self.consumer.start_lrps(start_requests.clone()).await;
        }
        if !stops.is_empty() {
            self.consumer.stop_lrps(stops.clone()).await;
        }
        if !events.is_empty() {
            self.consumer.publish_actual_lrp_events(events.clone()).await;
        }

        ControllerReport {
            start_requests,
            stop_requests: stops,
            events,
        }
    }

    /// Apply a task pass result and notify the consumer.
    pub async fn handle_task_result(&self, result: TaskConvergenceResult) {
        if !result.tasks_to_auction.is_empty() {
            self.consumer.start_tasks(result.tasks_to_auction).await;
        }
        if !result.tasks_to_complete.is_empty() {
            self.consumer.complete_tasks(result.tasks_to_complete).await;
        }
        if !result.events.is_empty() {
            self.consumer.publish_task_events(result.events).await;
        }
    }

    /// Free the slot of an instance on a missing cell. Returns true when the
    /// slot now needs placing.
    async fn replace_missing(
        &self,
        missing: &KeyWithMissingCell,
        events: &mut Vec<ActualLrpEvent>,
    ) -> bool {
        let lrp = &missing.actual_lrp;

        if self.generate_suspects && lrp.state == ActualLrpState::Running {
            match self.store.suspect_actual_lrp(&lrp.key).await {
                Ok(transition) => events.extend(ActualLrpEvent::from_transition(transition)),
                Err(e) => {
                    warn!(actual_lrp = %lrp.key, error = %e, "Failed to mark actual LRP suspect");
                    return false;
                }
            }
            return match self.store.create_unclaimed_actual_lrp(&lrp.key).await {
                Ok(transition) => {
                    info!(
                        actual_lrp = %lrp.key,
                        cell_id = %lrp.instance_key.cell_id,
                        "Created replacement for suspect actual LRP"
                    );
                    events.extend(ActualLrpEvent::from_transition(transition));
                    true
                }
                Err(e) => {
                    warn!(
                        actual_lrp = %lrp.key,
                        error = %e,
                        "Failed to create replacement actual LRP"
                    );
                    false
                }
            };
        }

        let guard = UnclaimGuard::OnCell(&lrp.instance_key.cell_id);
        match self.store.unclaim_actual_lrp_if(&lrp.key, guard).await {
            Ok(Some(transition)) => {
                info!(
                    actual_lrp = %lrp.key,
                    cell_id = %lrp.instance_key.cell_id,
                    "Unclaimed actual LRP on missing cell"
                );
                events.extend(ActualLrpEvent::from_transition(transition));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(actual_lrp = %lrp.key, error = %e, "Failed to unclaim actual LRP");
                false
            }
        }
    }
}
