// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Convergence: compare desired and actual state and correct the drift.
//!
//! A pass never trusts a single transaction to cover the whole fleet. It reads
//! a snapshot, decides per row, and applies each correction through the same
//! row-locking state machine the API uses, re-checking the condition under the
//! lock. Corrections that need a decision from outside the store (placing an
//! instance, stopping one on a cell, delivering a callback) come back in the
//! result for the [`ConvergenceController`] and its [`ConvergenceConsumer`].
//!
//! | Piece | Role |
//! |-------|------|
//! | [`LrpConvergence`] | one LRP pass |
//! | [`TaskConvergence`] | one task pass |
//! | [`ConvergenceController`] | acts on pass results |
//! | [`ConvergenceWorker`] | runs both passes on a timer under a lock |

mod controller;
mod lrp;
mod task;
mod work_pool;
mod worker;

pub use self::controller::{
    ControllerReport, ConvergenceConsumer, ConvergenceController, LoggingConsumer,
};
pub use self::lrp::{
    KeyToRetire, KeyWithMissingCell, LrpConvergence, LrpConvergenceConfig, LrpConvergenceResult,
    StartRequest,
};
pub use self::task::{
    TaskConvergence, TaskConvergenceConfig, TaskConvergenceResult, TaskStartRequest,
};
pub use self::worker::{CONVERGENCE_LOCK_KEY, ConvergenceWorker, ConvergenceWorkerConfig};
