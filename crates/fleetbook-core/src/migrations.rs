// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for fleetbook-core.
//!
//! Both schemas are embedded. [`SqlStore::migrate`](crate::persistence::SqlStore::migrate)
//! picks the right one for the connected database; products that manage their
//! own pools can run them directly.
//!
//! # Example
//!
//! ```ignore
//! use fleetbook_core::migrations;
//! use fleetbook_core::persistence::Dialect;
//!
//! sqlx::any::install_default_drivers();
//! let pool = sqlx::AnyPool::connect(&database_url).await?;
//! migrations::run(&pool, Dialect::from_url(&database_url)?).await?;
//! ```

use sqlx::AnyPool;
use sqlx::migrate::MigrateError;

use crate::persistence::Dialect;

/// PostgreSQL migrator with all migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// SQLite migrator with all migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run the migrations for `dialect`.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run(pool: &AnyPool, dialect: Dialect) -> Result<(), MigrateError> {
    match dialect {
        Dialect::Postgres => POSTGRES.run(pool).await,
        Dialect::Sqlite => SQLITE.run(pool).await,
    }
}
