// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LRP convergence pass.
//!
//! The pass:
//! 1. Prunes expired domains and reads the fresh ones
//! 2. Deletes evacuating rows whose cell is gone
//! 3. Reads every desired scheduling info and every actual row
//! 4. Walks the ordinary rows: orphans are retired, stale UNCLAIMED rows are
//!    re-requested, restartable CRASHED rows are unclaimed, and CLAIMED or
//!    RUNNING rows on missing cells are reported
//! 5. Walks the desired LRPs: missing indices get UNCLAIMED rows, extra
//!    indices are retired when the domain is fresh
//! 6. Classifies suspect rows
//!
//! Row mutations go through a bounded [`WorkPool`] and the pass waits for all
//! of them before assembling the result.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::work_pool::WorkPool;
use crate::clock::time_before;
use crate::error::{ErrorKind, Result};
use crate::events::ActualLrpEvent;
use crate::metrics::MetricsSink;
use crate::models::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpState, CellSet,
    DesiredLrpFilter, DesiredLrpSchedulingInfo, Presence, ResourceSpec, Transition,
};
use crate::persistence::{ActualLrpDb, DesiredLrpDb, DomainDb, SqlStore, UnclaimGuard};

/// Tunables for [`LrpConvergence`].
#[derive(Debug, Clone)]
pub struct LrpConvergenceConfig {
    /// An UNCLAIMED row older than this is handed to placement again.
    pub stale_unclaimed_duration: Duration,
    /// Row corrections in flight at once.
    pub workers: usize,
}

impl Default for LrpConvergenceConfig {
    fn default() -> Self {
        Self {
            stale_unclaimed_duration: Duration::from_secs(30),
            workers: 20,
        }
    }
}

/// Indices of one desired LRP that need placing.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    /// Desired LRP.
    pub process_guid: String,
    /// Its domain.
    pub domain: String,
    /// Slots to place, ascending.
    pub indices: Vec<i32>,
    /// Per-instance resources.
    pub resources: ResourceSpec,
    /// Root filesystem.
    pub rootfs: String,
    /// Cell placement tags.
    pub placement_tags: Vec<String>,
}

impl StartRequest {
    /// Request for `indices` of the LRP described by `info`.
    pub fn new(info: &DesiredLrpSchedulingInfo, indices: Vec<i32>) -> Self {
        Self {
            process_guid: info.process_guid.clone(),
            domain: info.domain.clone(),
            indices,
            resources: info.resources,
            rootfs: info.rootfs.clone(),
            placement_tags: info.placement_tags.clone(),
        }
    }
}

/// A CLAIMED or RUNNING row whose cell is not in the live set.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyWithMissingCell {
    /// The row as read by the pass.
    pub actual_lrp: ActualLrp,
    /// Its desired LRP.
    pub scheduling_info: DesiredLrpSchedulingInfo,
}

/// An ordinary row that should go away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyToRetire {
    /// Slot.
    pub key: ActualLrpKey,
    /// Instance to stop; empty when nothing runs for the slot.
    pub instance_key: ActualLrpInstanceKey,
}

impl From<&ActualLrp> for KeyToRetire {
    fn from(lrp: &ActualLrp) -> Self {
        Self {
            key: lrp.key.clone(),
            instance_key: lrp.instance_key.clone(),
        }
    }
}

/// Everything one LRP pass decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LrpConvergenceResult {
    /// Indices to place, one request per desired LRP.
    pub start_requests: Vec<StartRequest>,
    /// Rows on cells that vanished. Nothing has been mutated for them yet.
    pub keys_with_missing_cells: Vec<KeyWithMissingCell>,
    /// Orphaned and extra rows.
    pub keys_to_retire: Vec<KeyToRetire>,
    /// Suspect rows that are no longer needed.
    pub suspect_keys_to_retire: Vec<ActualLrpKey>,
    /// Suspect rows whose cell came back.
    pub suspect_keys_with_existing_cells: Vec<ActualLrpKey>,
    /// Cells referenced by rows but absent from the live set, sorted.
    pub missing_cell_ids: Vec<String>,
    /// Changes the pass made itself.
    pub events: Vec<ActualLrpEvent>,
}

impl LrpConvergenceResult {
    /// True when the pass found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.start_requests.is_empty()
            && self.keys_with_missing_cells.is_empty()
            && self.keys_to_retire.is_empty()
            && self.suspect_keys_to_retire.is_empty()
            && self.suspect_keys_with_existing_cells.is_empty()
            && self.events.is_empty()
    }
}

enum Job {
    Restarted(ActualLrpKey, Result<Option<Transition<ActualLrp>>>),
    Created(ActualLrpKey, Result<Transition<ActualLrp>>),
}

#[derive(Debug, Default)]
struct Counts {
    unclaimed: i64,
    claimed: i64,
    running: i64,
    crashed: i64,
    crashing_desired: HashSet<String>,
    missing: i64,
    extra: i64,
    suspect_running: i64,
    suspect_claimed: i64,
    desired: i64,
}

impl Counts {
    fn observe(&mut self, lrp: &ActualLrp) {
        match lrp.state {
            ActualLrpState::Unclaimed => self.unclaimed += 1,
            ActualLrpState::Claimed => self.claimed += 1,
            ActualLrpState::Running => self.running += 1,
            ActualLrpState::Crashed => self.crashed += 1,
        }
    }
}

/// Runs LRP convergence passes against a store.
pub struct LrpConvergence {
    store: SqlStore,
    config: LrpConvergenceConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl LrpConvergence {
    /// Create a convergence engine.
    pub fn new(
        store: SqlStore,
        config: LrpConvergenceConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Run one pass against the live `cells`.
    pub async fn converge(&self, cells: &CellSet) -> Result<LrpConvergenceResult> {
        let started = Instant::now();
        let now = self.store.now();
        let stale_before = time_before(now, self.config.stale_unclaimed_duration);
        let restart_calculator = self.store.config().restart_calculator;

        self.store.prune_expired_domains().await?;
        let fresh_domains: HashSet<String> =
            self.store.fresh_domains().await?.into_iter().collect();

        let mut result = LrpConvergenceResult::default();
        self.prune_evacuating(cells, &mut result).await?;

        let infos: BTreeMap<String, DesiredLrpSchedulingInfo> = self
            .store
            .desired_lrp_scheduling_infos(&DesiredLrpFilter::default())
            .await?
            .into_iter()
            .map(|info| (info.process_guid.clone(), info))
            .collect();

        let mut ordinary: BTreeMap<String, BTreeMap<i32, ActualLrp>> = BTreeMap::new();
        let mut suspects = Vec::new();
        for lrp in self.store.actual_lrps(&ActualLrpFilter::default()).await? {
            match lrp.presence {
                Presence::Ordinary => {
                    ordinary
                        .entry(lrp.key.process_guid.clone())
                        .or_default()
                        .insert(lrp.key.index, lrp);
                }
                Presence::Suspect => suspects.push(lrp),
                Presence::Evacuating => {}
            }
        }

        let mut counts = Counts::default();
        let mut starts: BTreeMap<String, BTreeSet<i32>> = BTreeMap::new();
        let mut missing_cells = BTreeSet::new();
        let mut pool = WorkPool::new(self.config.workers);

        for (process_guid, slots) in &ordinary {
            let info = infos.get(process_guid);
            for lrp in slots.values() {
                counts.observe(lrp);

                let Some(info) = info else {
                    debug!(actual_lrp = %lrp.key, "Retiring actual LRP without a desired LRP");
                    result.keys_to_retire.push(KeyToRetire::from(lrp));
                    continue;
                };
                if lrp.key.index >= info.instances {
                    continue;
                }

                match lrp.state {
                    ActualLrpState::Unclaimed if lrp.since < stale_before => {
                        debug!(actual_lrp = %lrp.key, "Re-requesting stale unclaimed actual LRP");
                        starts
                            .entry(process_guid.clone())
                            .or_default()
                            .insert(lrp.key.index);
                    }
                    ActualLrpState::Crashed => {
                        counts.crashing_desired.insert(process_guid.clone());
                        if lrp.should_restart_crash(now, &restart_calculator) {
                            let store = self.store.clone();
                            let key = lrp.key.clone();
                            pool.submit(async move {
                                let guard = UnclaimGuard::CrashedAndRestartable;
                                let outcome = store.unclaim_actual_lrp_if(&key, guard).await;
                                Job::Restarted(key, outcome)
                            });
                        }
                    }
                    ActualLrpState::Claimed | ActualLrpState::Running
                        if !cells.contains(&lrp.instance_key.cell_id) =>
                    {
                        missing_cells.insert(lrp.instance_key.cell_id.clone());
                        result.keys_with_missing_cells.push(KeyWithMissingCell {
                            actual_lrp: lrp.clone(),
                            scheduling_info: info.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        for (process_guid, info) in &infos {
            counts.desired += i64::from(info.instances);
            let slots = ordinary.get(process_guid);

            for index in 0..info.instances {
                if slots.is_some_and(|slots| slots.contains_key(&index)) {
                    continue;
                }
                counts.missing += 1;
                let store = self.store.clone();
                let key = ActualLrpKey::new(process_guid.clone(), index, info.domain.clone());
                pool.submit(async move {
                    let outcome = store.create_unclaimed_actual_lrp(&key).await;
                    Job::Created(key, outcome)
                });
            }

            let Some(slots) = slots else { continue };
            for lrp in slots.range(info.instances..).map(|(_, lrp)| lrp) {
                counts.extra += 1;
                if fresh_domains.contains(&info.domain) {
                    result.keys_to_retire.push(KeyToRetire::from(lrp));
                } else {
                    debug!(
                        actual_lrp = %lrp.key,
                        domain = %info.domain,
                        "Keeping extra actual LRP until its domain is fresh"
                    );
                }
            }
        }

        for suspect in &suspects {
            match suspect.state {
                ActualLrpState::Running => counts.suspect_running += 1,
                ActualLrpState::Claimed => counts.suspect_claimed += 1,
                _ => {}
            }

            let replacement_running = ordinary
                .get(&suspect.key.process_guid)
                .and_then(|slots| slots.get(&suspect.key.index))
                .is_some_and(|lrp| lrp.state == ActualLrpState::Running);

            if !infos.contains_key(&suspect.key.process_guid) || replacement_running {
                result.suspect_keys_to_retire.push(suspect.key.clone());
            } else if cells.contains(&suspect.instance_key.cell_id) {
                result
                    .suspect_keys_with_existing_cells
                    .push(suspect.key.clone());
            }
        }

        for job in pool.drain().await {
            match job {
                Job::Restarted(key, Ok(Some(transition))) => {
                    info!(actual_lrp = %key, "Restarting crashed actual LRP");
                    starts
                        .entry(key.process_guid.clone())
                        .or_default()
                        .insert(key.index);
                    result
                        .events
                        .extend(ActualLrpEvent::from_transition(transition));
                }
                Job::Restarted(_, Ok(None)) => {}
                Job::Restarted(key, Err(e)) => {
                    warn!(actual_lrp = %key, error = %e, "Failed to restart crashed actual LRP");
                }
                Job::Created(key, Ok(transition)) => {
                    starts
                        .entry(key.process_guid.clone())
                        .or_default()
                        .insert(key.index);
                    result
                        .events
                        .extend(ActualLrpEvent::from_transition(transition));
                }
                Job::Created(key, Err(e)) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(actual_lrp = %key, "Missing actual LRP was created concurrently");
                }
                Job::Created(key, Err(e)) => {
                    warn!(actual_lrp = %key, error = %e, "Failed to create missing actual LRP");
                }
            }
        }

        result.start_requests = starts
            .into_iter()
            .filter_map(|(process_guid, indices)| {
                infos
                    .get(&process_guid)
                    .map(|info| StartRequest::new(info, indices.into_iter().collect()))
            })
            .collect();
        result.keys_to_retire.sort_by(|a, b| {
            a.key
                .process_guid
                .cmp(&b.key.process_guid)
                .then(a.key.index.cmp(&b.key.index))
        });
        result.keys_to_retire.dedup();
        result.missing_cell_ids = missing_cells.into_iter().collect();
        result
            .events
            .sort_by_key(|event| event.actual_lrp().row_key());

        self.emit_metrics(&counts, &fresh_domains);

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            start_requests = result.start_requests.len(),
            missing_cells = result.keys_with_missing_cells.len(),
            retire = result.keys_to_retire.len(),
            suspects_to_retire = result.suspect_keys_to_retire.len(),
            suspects_with_cells = result.suspect_keys_with_existing_cells.len(),
            "LRP convergence completed"
        );
        Ok(result)
    }

    async fn prune_evacuating(
        &self,
        cells: &CellSet,
        result: &mut LrpConvergenceResult,
    ) -> Result<()> {
        let filter = ActualLrpFilter {
            presence: Some(Presence::Evacuating),
            ..Default::default()
        };
        for lrp in self.store.actual_lrps(&filter).await? {
            if cells.contains(&lrp.instance_key.cell_id) {
                continue;
            }
            match self
                .store
                .remove_evacuating_actual_lrp(&lrp.key, Some(&lrp.instance_key))
                .await
            {
                Ok(transition) => {
                    info!(
                        actual_lrp = %lrp.key,
                        cell_id = %lrp.instance_key.cell_id,
                        "Removed evacuating actual LRP on missing cell"
                    );
                    result
                        .events
                        .extend(ActualLrpEvent::from_transition(transition));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        actual_lrp = %lrp.key,
                        error = %e,
                        "Failed to remove evacuating actual LRP"
                    );
                }
            }
        }
        Ok(())
    }

    fn emit_metrics(&self, counts: &Counts, fresh_domains: &HashSet<String>) {
        let m = &self.metrics;
        m.gauge("LRPsUnclaimed", counts.unclaimed);
        m.gauge("LRPsClaimed", counts.claimed);
        m.gauge("LRPsRunning", counts.running);
        m.gauge("CrashedActualLRPs", counts.crashed);
        m.gauge("CrashingDesiredLRPs", counts.crashing_desired.len() as i64);
        m.gauge("LRPsMissing", counts.missing);
        m.gauge("LRPsExtra", counts.extra);
        m.gauge("SuspectRunningActualLRPs", counts.suspect_running);
        m.gauge("SuspectClaimedActualLRPs", counts.suspect_claimed);
        m.gauge("LRPsDesired", counts.desired);
        for domain in fresh_domains {
            m.gauge(&format!("Domain.{}", domain), 1);
        }
    }
}
