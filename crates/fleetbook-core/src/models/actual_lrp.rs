// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ModificationTag, RestartCalculator};
use crate::error::StoreError;

/// Lifecycle state of one actual instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActualLrpState {
    /// Waiting for placement.
    Unclaimed,
    /// A cell accepted the instance and is preparing it.
    Claimed,
    /// Running on a cell.
    Running,
    /// Crashed and parked until its backoff expires.
    Crashed,
}

impl ActualLrpState {
    /// Every state, in lifecycle order.
    pub const ALL: [ActualLrpState; 4] = [
        ActualLrpState::Unclaimed,
        ActualLrpState::Claimed,
        ActualLrpState::Running,
        ActualLrpState::Crashed,
    ];

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclaimed => "UNCLAIMED",
            Self::Claimed => "CLAIMED",
            Self::Running => "RUNNING",
            Self::Crashed => "CRASHED",
        }
    }

    /// Rule on the instance key for moving from `self` to `to`, or `None`
    /// when the transition is never legal.
    pub fn transition_to(self, to: ActualLrpState) -> Option<KeyRequirement> {
        use ActualLrpState::*;
        use KeyRequirement::*;

        match (self, to) {
            (Unclaimed, Unclaimed) => Some(Any),
            (Unclaimed, Claimed) => Some(Any),
            (Unclaimed, Running) => Some(Any),
            (Unclaimed, Crashed) => None,

            (Claimed, Unclaimed) => Some(Empty),
            (Claimed, Claimed) => Some(Same),
            (Claimed, Running) => Some(Any),
            (Claimed, Crashed) => Some(Same),

            (Running, Unclaimed) => Some(Empty),
            (Running, Claimed) => Some(Same),
            (Running, Running) => Some(Same),
            (Running, Crashed) => Some(Same),

            (Crashed, Unclaimed) => Some(Empty),
            (Crashed, Claimed) => None,
            (Crashed, Running) => None,
            (Crashed, Crashed) => None,
        }
    }
}

impl fmt::Display for ActualLrpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActualLrpState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNCLAIMED" => Ok(Self::Unclaimed),
            "CLAIMED" => Ok(Self::Claimed),
            "RUNNING" => Ok(Self::Running),
            "CRASHED" => Ok(Self::Crashed),
            other => Err(format!("unknown actual LRP state '{}'", other)),
        }
    }
}

/// What a transition demands of the instance key presented by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequirement {
    /// Any instance key.
    Any,
    /// Must equal the key currently on the row.
    Same,
    /// Must be empty (the row is being released, not handed to a cell).
    Empty,
}

/// Which copy of a logical instance slot a row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// The authoritative copy.
    Ordinary,
    /// An instance still running on a cell that is draining.
    Evacuating,
    /// An instance on a cell that stopped reporting, kept while a replacement starts.
    Suspect,
}

impl Presence {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Evacuating => "evacuating",
            Self::Suspect => "suspect",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Presence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinary" => Ok(Self::Ordinary),
            "evacuating" => Ok(Self::Evacuating),
            "suspect" => Ok(Self::Suspect),
            other => Err(format!("unknown presence '{}'", other)),
        }
    }
}

/// Identifies a logical instance slot of a desired LRP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActualLrpKey {
    /// Owning desired LRP.
    pub process_guid: String,
    /// Slot index in `[0, instances)`.
    pub index: i32,
    /// Domain of the owning desired LRP.
    pub domain: String,
}

impl ActualLrpKey {
    /// Build a key.
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }
}

impl fmt::Display for ActualLrpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_guid, self.index)
    }
}

/// Identifies the replica executing a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActualLrpInstanceKey {
    /// Replica identity chosen by the cell.
    pub instance_guid: String,
    /// Cell running the replica.
    pub cell_id: String,
}

impl ActualLrpInstanceKey {
    /// Build an instance key.
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    /// True for the cleared key.
    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }

    /// Reject keys that do not name both a replica and a cell.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.instance_guid.is_empty() {
            return Err(StoreError::Validation {
                field: "instance_guid",
                message: "must not be empty".to_string(),
            });
        }
        if self.cell_id.is_empty() {
            return Err(StoreError::Validation {
                field: "cell_id",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `self` (presented by a caller) satisfies `requirement` against `current`.
    pub fn satisfies(&self, requirement: KeyRequirement, current: &ActualLrpInstanceKey) -> bool {
        match requirement {
            KeyRequirement::Any => true,
            KeyRequirement::Same => self == current,
            KeyRequirement::Empty => self.is_empty(),
        }
    }
}

/// Container-to-host port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub container_port: u32,
    /// Port on the host address.
    pub host_port: u32,
}

/// Network coordinates of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpNetInfo {
    /// Host address.
    pub address: String,
    /// Container address.
    #[serde(default)]
    pub instance_address: String,
    /// Exposed ports.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Whether routers should prefer the instance address.
    #[serde(default)]
    pub prefer_instance_address: bool,
}

impl ActualLrpNetInfo {
    /// True for the cleared value.
    pub fn is_empty(&self) -> bool {
        self == &ActualLrpNetInfo::default()
    }
}

/// Observed state of one copy of an instance slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrp {
    /// Slot identity.
    pub key: ActualLrpKey,
    /// Which copy of the slot this is.
    pub presence: Presence,
    /// Replica identity; empty unless claimed or running.
    pub instance_key: ActualLrpInstanceKey,
    /// Network info; empty unless running.
    pub net_info: ActualLrpNetInfo,
    /// Current state.
    pub state: ActualLrpState,
    /// Last placement failure, cleared on claim/start.
    pub placement_error: String,
    /// Crashes counted toward the restart backoff.
    pub crash_count: i32,
    /// Reason given with the last crash.
    pub crash_reason: String,
    /// Time of the last state transition.
    pub since: DateTime<Utc>,
    /// Optimistic-concurrency marker.
    pub modification_tag: ModificationTag,
}

impl ActualLrp {
    /// A fresh ordinary row waiting for placement.
    pub fn unclaimed(key: ActualLrpKey, epoch: String, since: DateTime<Utc>) -> Self {
        Self {
            key,
            presence: Presence::Ordinary,
            instance_key: ActualLrpInstanceKey::default(),
            net_info: ActualLrpNetInfo::default(),
            state: ActualLrpState::Unclaimed,
            placement_error: String::new(),
            crash_count: 0,
            crash_reason: String::new(),
            since,
            modification_tag: ModificationTag::new(epoch),
        }
    }

    /// Whether a caller presenting `instance_key` may move this row to `to`.
    pub fn allows_transition_to(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        to: ActualLrpState,
    ) -> bool {
        if self.key.process_guid != key.process_guid || self.key.index != key.index {
            return false;
        }
        match self.state.transition_to(to) {
            Some(requirement) => instance_key.satisfies(requirement, &self.instance_key),
            None => false,
        }
    }

    /// Whether a crashed row's backoff has elapsed at `now`.
    pub fn should_restart_crash(&self, now: DateTime<Utc>, calculator: &RestartCalculator) -> bool {
        self.state == ActualLrpState::Crashed
            && calculator.should_restart(now, self.since, self.crash_count)
    }

    /// `process_guid/index/presence`, used in logs and error keys.
    pub fn row_key(&self) -> String {
        format!("{}/{}", self.key, self.presence)
    }
}

/// Filter for listing actual LRPs. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ActualLrpFilter {
    /// Only this domain.
    pub domain: Option<String>,
    /// Only rows on this cell.
    pub cell_id: Option<String>,
    /// Only this desired LRP.
    pub process_guid: Option<String>,
    /// Only this slot index.
    pub index: Option<i32>,
    /// Only this presence.
    pub presence: Option<Presence>,
}
