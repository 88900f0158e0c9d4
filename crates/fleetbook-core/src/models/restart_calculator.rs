// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::time_after;

/// Decides when a crashed instance may be restarted.
///
/// The first `immediate_restarts` crashes restart right away. After that the
/// wait doubles from [`RestartCalculator::MIN_BACKOFF`] up to
/// `max_backoff_duration`, and once `max_restart_attempts` is reached
/// (when non-zero) the instance stays crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartCalculator {
    /// Crashes that restart without any backoff.
    pub immediate_restarts: i32,
    /// Largest exponent applied to the minimum backoff.
    pub max_backoff_count: i32,
    /// Ceiling for a single backoff.
    pub max_backoff_duration: Duration,
    /// Crash count at which restarts stop. Zero disables the cap.
    pub max_restart_attempts: i32,
}

impl RestartCalculator {
    /// Shortest backoff once immediate restarts are used up.
    pub const MIN_BACKOFF: Duration = Duration::from_secs(30);
    /// Default count of immediate restarts.
    pub const DEFAULT_IMMEDIATE_RESTARTS: i32 = 3;
    /// Default ceiling for a single backoff.
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(16 * 60);
    /// Default restart cap.
    pub const DEFAULT_MAX_RESTARTS: i32 = 200;

    /// Build a calculator, deriving the backoff exponent cap from `max_backoff_duration`.
    pub fn new(
        immediate_restarts: i32,
        max_backoff_duration: Duration,
        max_restart_attempts: i32,
    ) -> Self {
        Self {
            immediate_restarts,
            max_backoff_count: max_backoff_count(max_backoff_duration),
            max_backoff_duration,
            max_restart_attempts,
        }
    }

    /// Reject configurations whose ceiling is below the minimum backoff.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_backoff_duration < Self::MIN_BACKOFF {
            return Err(format!(
                "max backoff duration {:?} must be at least {:?}",
                self.max_backoff_duration,
                Self::MIN_BACKOFF
            ));
        }
        Ok(())
    }

    /// Whether a crash with this count restarts with no backoff at all.
    pub fn should_restart_immediately(&self, crash_count: i32) -> bool {
        crash_count < self.immediate_restarts
    }

    /// Whether an instance that crashed at `crashed_at` may be restarted at `now`.
    pub fn should_restart(
        &self,
        now: DateTime<Utc>,
        crashed_at: DateTime<Utc>,
        crash_count: i32,
    ) -> bool {
        if crash_count < self.immediate_restarts {
            return true;
        }
        if self.max_restart_attempts > 0 && crash_count >= self.max_restart_attempts {
            return false;
        }

        let backoff = self
            .backoff(crash_count - self.immediate_restarts)
            .min(self.max_backoff_duration);
        time_after(crashed_at, backoff) <= now
    }

    fn backoff(&self, exponent: i32) -> Duration {
        let exponent = exponent.clamp(0, self.max_backoff_count.clamp(0, 31)) as u32;
        Self::MIN_BACKOFF.saturating_mul(1u32 << exponent)
    }
}

impl Default for RestartCalculator {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_IMMEDIATE_RESTARTS,
            Self::DEFAULT_MAX_BACKOFF,
            Self::DEFAULT_MAX_RESTARTS,
        )
    }
}

/// floor(log2(ceil(max / MIN_BACKOFF)))
fn max_backoff_count(max_backoff: Duration) -> i32 {
    let min = RestartCalculator::MIN_BACKOFF.as_nanos();
    let steps = max_backoff.as_nanos().div_ceil(min);
    if steps == 0 {
        return 0;
    }
    (u128::BITS - 1 - steps.leading_zeros()) as i32
}
