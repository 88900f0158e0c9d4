// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Injectable time and identifier sources.
//!
//! All `since`, `updated_at` and TTL computations read the time from a
//! [`Clock`], and all modification-tag epochs come from a [`GuidProvider`],
//! so tests can drive both deterministically.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono_duration(by);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Source of globally unique identifiers (modification-tag epochs, lock owners).
pub trait GuidProvider: Send + Sync {
    /// A fresh identifier.
    fn next_guid(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGuidProvider;

impl GuidProvider for UuidGuidProvider {
    fn next_guid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Predictable identifiers (`<prefix>-1`, `<prefix>-2`, ...) for tests.
#[derive(Debug)]
pub struct SequentialGuidProvider {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGuidProvider {
    /// Create a provider whose identifiers start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl GuidProvider for SequentialGuidProvider {
    fn next_guid(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

/// Convert a std duration, saturating instead of failing on overflow.
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// `now - d`, clamped to the earliest representable time.
pub(crate) fn time_before(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(chrono_duration(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `now + d`, clamped to the latest representable time.
pub(crate) fn time_after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_add_signed(chrono_duration(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Unix nanoseconds as stored in BIGINT columns.
pub(crate) fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// `0` in a nanosecond column means "never set".
pub(crate) fn optional_from_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    (nanos != 0).then(|| from_nanos(nanos))
}
