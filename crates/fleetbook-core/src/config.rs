// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::convergence::{ConvergenceWorkerConfig, LrpConvergenceConfig, TaskConvergenceConfig};
use crate::models::RestartCalculator;
use crate::persistence::StoreConfig;

/// Fleetbook configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
    /// Storage layer tunables
    pub store: StoreConfig,
    /// LRP pass tunables
    pub lrp_convergence: LrpConvergenceConfig,
    /// Worker tick, lock and task pass settings
    pub worker: ConvergenceWorkerConfig,
    /// Keep RUNNING instances on missing cells as suspects instead of unclaiming them
    pub generate_suspect_actual_lrps: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FLEETBOOK_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FLEETBOOK_DATABASE_MAX_CONNECTIONS` (10)
    /// - `FLEETBOOK_CONVERGENCE_INTERVAL_SECS` (30)
    /// - `FLEETBOOK_CONVERGENCE_WORKERS` (20)
    /// - `FLEETBOOK_STALE_UNCLAIMED_SECS` (30)
    /// - `FLEETBOOK_CRASH_RESET_TIMEOUT_SECS` (300)
    /// - `FLEETBOOK_IMMEDIATE_RESTARTS` (3)
    /// - `FLEETBOOK_MAX_BACKOFF_SECS` (960)
    /// - `FLEETBOOK_MAX_RESTART_ATTEMPTS` (200, 0 = unlimited)
    /// - `FLEETBOOK_KICK_TASK_DURATION_SECS` (30)
    /// - `FLEETBOOK_EXPIRE_PENDING_TASK_SECS` (1800)
    /// - `FLEETBOOK_EXPIRE_COMPLETED_TASK_SECS` (120)
    /// - `FLEETBOOK_MAX_DEADLOCK_RETRIES` (3)
    /// - `FLEETBOOK_CONVERGENCE_LOCK_TTL_SECS` (15)
    /// - `FLEETBOOK_LOCK_OWNER` (random uuid)
    /// - `FLEETBOOK_GENERATE_SUSPECT_ACTUAL_LRPS` (false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLEETBOOK_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FLEETBOOK_DATABASE_URL"))?;

        let max_connections: u32 = parse_or(
            "FLEETBOOK_DATABASE_MAX_CONNECTIONS",
            10,
            "must be a positive integer",
        )?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid(
                "FLEETBOOK_DATABASE_MAX_CONNECTIONS",
                "must be a positive integer",
            ));
        }

        let restart_calculator = RestartCalculator::new(
            parse_or(
                "FLEETBOOK_IMMEDIATE_RESTARTS",
                RestartCalculator::DEFAULT_IMMEDIATE_RESTARTS,
                "must be an integer",
            )?,
            secs_or(
                "FLEETBOOK_MAX_BACKOFF_SECS",
                RestartCalculator::DEFAULT_MAX_BACKOFF.as_secs(),
            )?,
            parse_or(
                "FLEETBOOK_MAX_RESTART_ATTEMPTS",
                RestartCalculator::DEFAULT_MAX_RESTARTS,
                "must be an integer",
            )?,
        );
        restart_calculator.validate().map_err(|_| {
            ConfigError::Invalid(
                "FLEETBOOK_MAX_BACKOFF_SECS",
                "must be at least 30 seconds",
            )
        })?;

        let store = StoreConfig {
            max_deadlock_retries: parse_or(
                "FLEETBOOK_MAX_DEADLOCK_RETRIES",
                3,
                "must be a positive integer",
            )?,
            crash_reset_timeout: secs_or("FLEETBOOK_CRASH_RESET_TIMEOUT_SECS", 300)?,
            restart_calculator,
            ..StoreConfig::default()
        };

        let lrp_convergence = LrpConvergenceConfig {
            stale_unclaimed_duration: secs_or("FLEETBOOK_STALE_UNCLAIMED_SECS", 30)?,
            workers: parse_or(
                "FLEETBOOK_CONVERGENCE_WORKERS",
                20,
                "must be a positive integer",
            )?,
        };

        let worker = ConvergenceWorkerConfig {
            interval: secs_or("FLEETBOOK_CONVERGENCE_INTERVAL_SECS", 30)?,
            lock_ttl: secs_or("FLEETBOOK_CONVERGENCE_LOCK_TTL_SECS", 15)?,
            owner: std::env::var("FLEETBOOK_LOCK_OWNER")
                .ok()
                .filter(|owner| !owner.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            task: TaskConvergenceConfig {
                kick_task_duration: secs_or("FLEETBOOK_KICK_TASK_DURATION_SECS", 30)?,
                expire_pending_task_duration: secs_or("FLEETBOOK_EXPIRE_PENDING_TASK_SECS", 1800)?,
                expire_completed_task_duration: secs_or(
                    "FLEETBOOK_EXPIRE_COMPLETED_TASK_SECS",
                    120,
                )?,
            },
        };

        let generate_suspect_actual_lrps = std::env::var("FLEETBOOK_GENERATE_SUSPECT_ACTUAL_LRPS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            max_connections,
            store,
            lrp_convergence,
            worker,
            generate_suspect_actual_lrps,
        })
    }
}

fn parse_or<T: FromStr>(
    var: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid(var, message)),
        Err(_) => Ok(default),
    }
}

fn secs_or(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(var, default, "must be a whole number of seconds").map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: &[&str] = &[
        "FLEETBOOK_DATABASE_MAX_CONNECTIONS",
        "FLEETBOOK_CONVERGENCE_INTERVAL_SECS",
        "FLEETBOOK_CONVERGENCE_WORKERS",
        "FLEETBOOK_STALE_UNCLAIMED_SECS",
        "FLEETBOOK_CRASH_RESET_TIMEOUT_SECS",
        "FLEETBOOK_IMMEDIATE_RESTARTS",
        "FLEETBOOK_MAX_BACKOFF_SECS",
        "FLEETBOOK_MAX_RESTART_ATTEMPTS",
        "FLEETBOOK_KICK_TASK_DURATION_SECS",
        "FLEETBOOK_EXPIRE_PENDING_TASK_SECS",
        "FLEETBOOK_EXPIRE_COMPLETED_TASK_SECS",
        "FLEETBOOK_MAX_DEADLOCK_RETRIES",
        "FLEETBOOK_CONVERGENCE_LOCK_TTL_SECS",
        "FLEETBOOK_LOCK_OWNER",
        "FLEETBOOK_GENERATE_SUSPECT_ACTUAL_LRPS",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for var in OPTIONAL_VARS {
                self.remove(var);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FLEETBOOK_DATABASE_URL", "postgres://localhost/test");
        guard.clear_optional();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.store.max_deadlock_retries, 3);
        assert_eq!(config.store.crash_reset_timeout, Duration::from_secs(300));
        assert_eq!(config.store.restart_calculator, RestartCalculator::default());
        assert_eq!(config.lrp_convergence.workers, 20);
        assert_eq!(config.worker.interval, Duration::from_secs(30));
        assert_eq!(config.worker.lock_ttl, Duration::from_secs(15));
        assert_eq!(
            config.worker.task.expire_pending_task_duration,
            Duration::from_secs(1800)
        );
        assert!(!config.worker.owner.is_empty());
        assert!(!config.generate_suspect_actual_lrps);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FLEETBOOK_DATABASE_URL", "sqlite:fleet.db");
        guard.clear_optional();
        guard.set("FLEETBOOK_DATABASE_MAX_CONNECTIONS", "4");
        guard.set("FLEETBOOK_CONVERGENCE_WORKERS", "5");
        guard.set("FLEETBOOK_IMMEDIATE_RESTARTS", "1");
        guard.set("FLEETBOOK_MAX_BACKOFF_SECS", "120");
        guard.set("FLEETBOOK_KICK_TASK_DURATION_SECS", "10");
        guard.set("FLEETBOOK_LOCK_OWNER", "bbs-z1-0");
        guard.set("FLEETBOOK_GENERATE_SUSPECT_ACTUAL_LRPS", "true");

        let config = Config::from_env().unwrap();

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.lrp_convergence.workers, 5);
        assert_eq!(config.store.restart_calculator.immediate_restarts, 1);
        assert_eq!(config.store.restart_calculator.max_backoff_count, 2);
        assert_eq!(
            config.worker.task.kick_task_duration,
            Duration::from_secs(10)
        );
        assert_eq!(config.worker.owner, "bbs-z1-0");
        assert!(config.generate_suspect_actual_lrps);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("FLEETBOOK_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("FLEETBOOK_DATABASE_URL")));
        assert!(err.to_string().contains("FLEETBOOK_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FLEETBOOK_DATABASE_URL", "postgres://localhost/test");
        guard.clear_optional();
        guard.set("FLEETBOOK_STALE_UNCLAIMED_SECS", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("FLEETBOOK_STALE_UNCLAIMED_SECS", _)
        ));

        guard.remove("FLEETBOOK_STALE_UNCLAIMED_SECS");
        guard.set("FLEETBOOK_DATABASE_MAX_CONNECTIONS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("FLEETBOOK_DATABASE_MAX_CONNECTIONS", _)
        ));

        guard.remove("FLEETBOOK_DATABASE_MAX_CONNECTIONS");
        guard.set("FLEETBOOK_MAX_BACKOFF_SECS", "5");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("FLEETBOOK_MAX_BACKOFF_SECS", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
