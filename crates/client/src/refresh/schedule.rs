// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure timing rules for proactive refresh.

use std::time::Duration;

/// Shortest delay ever armed for a proactive refresh.
pub const MIN_SCHEDULE_DELAY: Duration = Duration::from_secs(30);
/// Base and ceiling of the backoff after failed proactive refreshes.
pub const RETRY_BASE: Duration = Duration::from_secs(30);
pub const RETRY_CEILING: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProactivePlan {
    /// No usable expiry: leave the timer off.
    Unscheduled,
    /// Already inside the buffer window.
    Immediate,
    After(Duration),
}

/// Decide when to refresh given the time left on the access token.
pub fn plan_proactive(time_until_expiry: Option<Duration>, buffer: Duration) -> ProactivePlan {
    match time_until_expiry {
        None => ProactivePlan::Unscheduled,
        Some(left) if left <= buffer => ProactivePlan::Immediate,
        Some(left) => ProactivePlan::After((left - buffer).max(MIN_SCHEDULE_DELAY)),
    }
}

/// Delay before retrying after the `attempt`-th consecutive failure.
pub fn proactive_retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    RETRY_BASE.saturating_mul(1u32 << exp).min(RETRY_CEILING)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
