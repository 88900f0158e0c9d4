// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ModificationTag;
use crate::error::{Result, StoreError};

/// Routing information keyed by router name. Values are opaque to the store.
pub type Routes = BTreeMap<String, serde_json::Value>;

/// Resources reserved for each instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Memory in megabytes.
    pub memory_mb: i32,
    /// Disk in megabytes.
    pub disk_mb: i32,
    /// Process limit, zero for unlimited.
    pub max_pids: i32,
}

/// One environment variable of the run spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// How to run an instance. Stored as JSON and never interpreted by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Action graph executed to start the process.
    #[serde(default)]
    pub action: serde_json::Value,
    /// Environment.
    #[serde(default)]
    pub env: Vec<EnvironmentVariable>,
    /// Exposed container ports.
    #[serde(default)]
    pub ports: Vec<u32>,
    /// How long the process may take to become healthy.
    #[serde(default)]
    pub start_timeout_ms: i64,
    /// Health check action.
    #[serde(default)]
    pub monitor: Option<serde_json::Value>,
}

/// Desired state of a long-running process.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredLrp {
    /// Unique key.
    pub process_guid: String,
    /// Deployment domain.
    pub domain: String,
    /// Log stream identity.
    pub log_guid: String,
    /// Free-form client annotation.
    pub annotation: String,
    /// Desired instance count.
    pub instances: i32,
    /// Per-instance resources.
    pub resources: ResourceSpec,
    /// Root filesystem.
    pub rootfs: String,
    /// Cell placement tags.
    pub placement_tags: Vec<String>,
    /// Routing info.
    pub routes: Routes,
    /// Run spec.
    pub run_info: RunInfo,
    /// Optimistic-concurrency marker, assigned by the store.
    pub modification_tag: ModificationTag,
}

impl DesiredLrp {
    /// A desired LRP with default resources and an empty run spec.
    pub fn new(process_guid: impl Into<String>, domain: impl Into<String>, instances: i32) -> Self {
        Self {
            process_guid: process_guid.into(),
            domain: domain.into(),
            log_guid: String::new(),
            annotation: String::new(),
            instances,
            resources: ResourceSpec::default(),
            rootfs: String::new(),
            placement_tags: Vec::new(),
            routes: Routes::new(),
            run_info: RunInfo::default(),
            modification_tag: ModificationTag::new(""),
        }
    }

    /// Check the fields a client must get right.
    pub fn validate(&self) -> Result<()> {
        if self.process_guid.is_empty() {
            return Err(StoreError::Validation {
                field: "process_guid",
                message: "must not be empty".to_string(),
            });
        }
        if self.domain.is_empty() {
            return Err(StoreError::Validation {
                field: "domain",
                message: "must not be empty".to_string(),
            });
        }
        if self.instances < 0 {
            return Err(StoreError::Validation {
                field: "instances",
                message: format!("must not be negative, got {}", self.instances),
            });
        }
        if self.resources.memory_mb < 0 || self.resources.disk_mb < 0 || self.resources.max_pids < 0
        {
            return Err(StoreError::Validation {
                field: "resources",
                message: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    /// The subset of fields convergence and placement need.
    pub fn scheduling_info(&self) -> DesiredLrpSchedulingInfo {
        DesiredLrpSchedulingInfo {
            process_guid: self.process_guid.clone(),
            domain: self.domain.clone(),
            log_guid: self.log_guid.clone(),
            annotation: self.annotation.clone(),
            instances: self.instances,
            resources: self.resources,
            rootfs: self.rootfs.clone(),
            placement_tags: self.placement_tags.clone(),
            routes: self.routes.clone(),
            modification_tag: self.modification_tag.clone(),
        }
    }
}

/// Desired LRP without its run spec.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredLrpSchedulingInfo {
    /// Unique key.
    pub process_guid: String,
    /// Deployment domain.
    pub domain: String,
    /// Log stream identity.
    pub log_guid: String,
    /// Free-form client annotation.
    pub annotation: String,
    /// Desired instance count.
    pub instances: i32,
    /// Per-instance resources.
    pub resources: ResourceSpec,
    /// Root filesystem.
    pub rootfs: String,
    /// Cell placement tags.
    pub placement_tags: Vec<String>,
    /// Routing info.
    pub routes: Routes,
    /// Optimistic-concurrency marker.
    pub modification_tag: ModificationTag,
}

/// Mutable fields of a desired LRP. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredLrpUpdate {
    /// New instance count.
    pub instances: Option<i32>,
    /// New routes.
    pub routes: Option<Routes>,
    /// New annotation.
    pub annotation: Option<String>,
}

impl DesiredLrpUpdate {
    /// Apply to `lrp`, reporting whether anything changed.
    pub fn apply_to(&self, lrp: &mut DesiredLrp) -> Result<bool> {
        let mut changed = false;
        if let Some(instances) = self.instances {
            if instances < 0 {
                return Err(StoreError::Validation {
                    field: "instances",
                    message: format!("must not be negative, got {}", instances),
                });
            }
            changed |= lrp.instances != instances;
            lrp.instances = instances;
        }
        if let Some(routes) = &self.routes {
            changed |= &lrp.routes != routes;
            lrp.routes = routes.clone();
        }
        if let Some(annotation) = &self.annotation {
            changed |= &lrp.annotation != annotation;
            lrp.annotation = annotation.clone();
        }
        Ok(changed)
    }
}

/// Filter for listing desired LRPs. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DesiredLrpFilter {
    /// Only this domain.
    pub domain: Option<String>,
    /// Only these process guids.
    pub process_guids: Vec<String>,
}
