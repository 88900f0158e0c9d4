// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetbook-core.
//!
//! Every store and convergence operation returns [`StoreError`]. Callers that
//! only care about the broad category (retry, back off, report) match on
//! [`StoreError::kind`] instead of individual variants.

use std::fmt;

use thiserror::Error;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Broad error categories shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Target row is absent.
    NotFound,
    /// Duplicate create.
    AlreadyExists,
    /// The requested transition is not legal from the current state.
    InvalidStateTransition,
    /// Someone else holds the lock.
    LockCollision,
    /// A stored payload could not be decoded.
    Deserialize,
    /// Deadlock or serialization failure; safe to retry.
    Transient,
    /// Caller-side contract violation.
    BadRequest,
    /// Any other database failure.
    Internal,
}

/// Actual LRP operations that can be refused by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrpAction {
    /// Claim by a cell.
    Claimed,
    /// Start report from a cell.
    Started,
    /// Crash report from a cell.
    Crashed,
    /// Placement failure.
    Failed,
    /// Unclaim.
    Unclaimed,
    /// Removal with an instance key.
    Removed,
    /// Evacuation report.
    Evacuated,
    /// Presence change to suspect.
    Suspected,
}

impl fmt::Display for LrpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Claimed => "claimed",
            Self::Started => "started",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
            Self::Unclaimed => "unclaimed",
            Self::Removed => "removed",
            Self::Evacuated => "evacuated",
            Self::Suspected => "suspected",
        };
        f.write_str(s)
    }
}

/// Errors produced by the store, the state machines and convergence.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Row was not found.
    #[error("{resource} '{key}' not found")]
    ResourceNotFound {
        /// Kind of record ("actual_lrp", "task", ...).
        resource: &'static str,
        /// Identifying key.
        key: String,
    },

    /// Row already exists.
    #[error("{resource} '{key}' already exists")]
    ResourceExists {
        /// Kind of record.
        resource: &'static str,
        /// Identifying key.
        key: String,
    },

    /// Transition is not allowed by the state machine.
    #[error("cannot transition {resource} '{key}' from '{from}' to '{to}'")]
    InvalidStateTransition {
        /// Kind of record.
        resource: &'static str,
        /// Identifying key.
        key: String,
        /// State before the attempted transition.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Actual LRP state machine refused an operation.
    #[error("actual LRP '{key}' cannot be {action} from state '{state}'")]
    ActualLrpCannotBe {
        /// The refused operation.
        action: LrpAction,
        /// Identifying key.
        key: String,
        /// Current state of the row.
        state: String,
    },

    /// Task completion was reported by a cell that does not own the task.
    #[error("task '{task_guid}' is running on cell '{running_cell}', not '{requested_cell}'")]
    RunningOnDifferentCell {
        /// Task guid.
        task_guid: String,
        /// Cell that reported.
        requested_cell: String,
        /// Cell the task is running on.
        running_cell: String,
    },

    /// Caller-side contract violation.
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong.
        message: String,
    },

    /// Input validation failed.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// The validation error message.
        message: String,
    },

    /// Lock is held by another owner.
    #[error("lock '{key}' is held by '{owner}'")]
    LockCollision {
        /// Lock key.
        key: String,
        /// Current owner.
        owner: String,
    },

    /// Stored payload is corrupt.
    #[error("failed to deserialize {resource} '{key}': {details}")]
    Deserialize {
        /// Kind of record.
        resource: &'static str,
        /// Identifying key.
        key: String,
        /// Decoder message.
        details: String,
    },

    /// Deadlock or serialization failure reported by the database.
    #[error("transaction deadlocked during '{operation}': {details}")]
    Deadlock {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    #[error("database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceNotFound { .. } => ErrorKind::NotFound,
            Self::ResourceExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidStateTransition { .. } | Self::ActualLrpCannotBe { .. } => {
                ErrorKind::InvalidStateTransition
            }
            Self::RunningOnDifferentCell { .. } => ErrorKind::InvalidStateTransition,
            Self::BadRequest { .. } | Self::Validation { .. } => ErrorKind::BadRequest,
            Self::LockCollision { .. } => ErrorKind::LockCollision,
            Self::Deserialize { .. } => ErrorKind::Deserialize,
            Self::Deadlock { .. } => ErrorKind::Transient,
            Self::Database { .. } => ErrorKind::Internal,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::ResourceExists { .. } => "RESOURCE_EXISTS",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::ActualLrpCannotBe { action, .. } => match action {
                LrpAction::Claimed => "ACTUAL_LRP_CANNOT_BE_CLAIMED",
                LrpAction::Started => "ACTUAL_LRP_CANNOT_BE_STARTED",
                LrpAction::Crashed => "ACTUAL_LRP_CANNOT_BE_CRASHED",
                LrpAction::Failed => "ACTUAL_LRP_CANNOT_BE_FAILED",
                LrpAction::Unclaimed => "ACTUAL_LRP_CANNOT_BE_UNCLAIMED",
                LrpAction::Removed => "ACTUAL_LRP_CANNOT_BE_REMOVED",
                LrpAction::Evacuated => "ACTUAL_LRP_CANNOT_BE_EVACUATED",
                LrpAction::Suspected => "ACTUAL_LRP_CANNOT_BE_SUSPECTED",
            },
            Self::RunningOnDifferentCell { .. } => "RUNNING_ON_DIFFERENT_CELL",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::LockCollision { .. } => "LOCK_COLLISION",
            Self::Deserialize { .. } => "DESERIALIZE",
            Self::Deadlock { .. } => "DEADLOCK",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether the storage layer should retry the whole transaction.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Re-label a generic unique-violation as a duplicate of a specific record.
    pub(crate) fn exists_as(self, resource: &'static str, key: impl Into<String>) -> Self {
        match self {
            Self::ResourceExists { .. } => Self::ResourceExists {
                resource,
                key: key.into(),
            },
            other => other,
        }
    }

    /// Attach the failing operation's name to database-level errors.
    pub(crate) fn during(self, operation: &str) -> Self {
        match self {
            Self::Deadlock { details, .. } => Self::Deadlock {
                operation: operation.to_string(),
                details,
            },
            Self::Database { details, .. } => Self::Database {
                operation: operation.to_string(),
                details,
            },
            other => other,
        }
    }

    pub(crate) fn not_found(resource: &'static str, key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource,
            key: key.into(),
        }
    }
}

/// Deadlock, serialization failure, or a busy/locked SQLite database.
fn is_retryable_database_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            // postgres deadlock_detected / serialization_failure
            Some("40P01") | Some("40001")
            // mysql ER_LOCK_DEADLOCK
            | Some("1213")
            // sqlite BUSY / LOCKED / BUSY_SNAPSHOT
            | Some("5") | Some("6") | Some("517")
        ),
        _ => false,
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_retryable_database_error(&err) {
            return StoreError::Deadlock {
                operation: "query".to_string(),
                details: err.to_string(),
            };
        }
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return StoreError::ResourceExists {
                resource: "row",
                key: db_err.constraint().unwrap_or_default().to_string(),
            };
        }
        StoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Deserialize {
            resource: "payload",
            key: String::new(),
            details: err.to_string(),
        }
    }
}
