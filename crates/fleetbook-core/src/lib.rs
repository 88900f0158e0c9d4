// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetbook Core - LRP and Task State Store
//!
//! This crate is the control-plane database of a fleet scheduler. It records what
//! should run (desired LRPs), what is running (actual LRPs) and one-off work (tasks),
//! enforces the state machines that govern them, and periodically converges the
//! recorded state toward the desired state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 API handlers, cell reps, placement                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ store traits
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SqlStore (this crate)                           │
//! │   DesiredLrpDb · ActualLrpDb · TaskDb · DomainDb · LockDb · ConfigDb    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                                              ▲
//!           ▼                                              │ passes
//! ┌───────────────────────┐                    ┌─────────────────────────────┐
//! │ PostgreSQL or SQLite  │                    │     ConvergenceWorker       │
//! │  (Durable Storage)    │                    │  LRP pass · task pass       │
//! └───────────────────────┘                    └─────────────────────────────┘
//!                                                          │
//!                                                          ▼
//!                                              ┌─────────────────────────────┐
//!                                              │    ConvergenceConsumer      │
//!                                              │ start/stop · callbacks      │
//!                                              └─────────────────────────────┘
//! ```
//!
//! # Actual LRP State Machine
//!
//! ```text
//!              claim                start
//!  UNCLAIMED ─────────▶ CLAIMED ─────────▶ RUNNING
//!      ▲                   │                  │
//!      │ unclaim / restart │ crash            │ crash
//!      │                   ▼                  ▼
//!      └────────────────────────────── CRASHED
//! ```
//!
//! A crash within the immediate restart budget sends the row straight back to
//! UNCLAIMED; otherwise it stays CRASHED until the backoff elapses and
//! convergence restarts it.
//!
//! # Task State Machine
//!
//! | From | Action | To |
//! |------|--------|----|
//! | `PENDING` | start | `RUNNING` |
//! | `PENDING`, `RUNNING` | cancel, fail | `COMPLETED` (failed) |
//! | `PENDING`, `RUNNING` (owning cell) | complete | `COMPLETED` |
//! | `PENDING`, `RUNNING` | reject | `PENDING` |
//! | `COMPLETED` | resolving | `RESOLVING` |
//! | `RESOLVING` | delete | removed |
//!
//! # Configuration
//!
//! The standalone worker is configured from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FLEETBOOK_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `FLEETBOOK_CONVERGENCE_INTERVAL_SECS` | No | `30` | Time between passes |
//! | `FLEETBOOK_CONVERGENCE_WORKERS` | No | `20` | Concurrent row mutations per pass |
//! | `FLEETBOOK_GENERATE_SUSPECT_ACTUAL_LRPS` | No | `false` | Keep lost instances as suspects |
//!
//! See [`config::Config::from_env`] for the full list.
//!
//! # Modules
//!
//! - [`clock`]: Injectable time and epoch sources
//! - [`config`]: Worker configuration from environment variables
//! - [`convergence`]: LRP and task passes, controller and background worker
//! - [`error`]: Error types with stable error codes
//! - [`events`]: Change events derived from transitions
//! - [`metrics`]: Gauge and counter sinks
//! - [`migrations`]: Embedded schemas
//! - [`models`]: Records and pure transition rules
//! - [`persistence`]: SQL store implementing every store trait

#![deny(missing_docs)]

/// Time and epoch sources, injectable for tests.
pub mod clock;

/// Worker configuration loaded from environment variables.
pub mod config;

/// Convergence passes, the controller that applies them, and the worker loop.
pub mod convergence;

/// Error types with stable error codes.
pub mod error;

/// Change events published after mutations.
pub mod events;

/// Metrics sinks.
pub mod metrics;

/// Embedded PostgreSQL and SQLite migrations.
pub mod migrations;

/// Domain records and transition rules.
pub mod models;

/// SQL-backed store.
pub mod persistence;

pub use error::{ErrorKind, Result, StoreError};
pub use persistence::{Dialect, SqlStore, StoreConfig};
