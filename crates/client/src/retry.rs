// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry decisions and backoff for ordinary API calls.

use std::time::Duration;

use rand::Rng;

use crate::request::RequestDescriptor;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Per-logical-request retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryDescriptor {
    /// Retries issued so far for this call.
    pub retry_count: u32,
    /// Already replayed once after a token refresh.
    pub replayed: bool,
}

impl RetryDescriptor {
    pub fn replay() -> Self {
        Self { retry_count: 0, replayed: true }
    }
}

/// What went wrong with an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// No response at all.
    NoResponse,
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    /// Calls to this path are never retried here.
    pub refresh_path: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_BACKOFF,
            max_jitter: MAX_JITTER,
            refresh_path: crate::client::REFRESH_PATH.to_owned(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(
        &self,
        request: &RequestDescriptor,
        retry: &RetryDescriptor,
        failure: Failure,
    ) -> bool {
        let transient = match failure {
            Failure::NoResponse => true,
            Failure::Status(status) => status >= 500,
        };
        transient
            && !request.targets(&self.refresh_path)
            && retry.retry_count < self.max_retries
            && !retry.replayed
    }

    /// Deterministic part of the backoff: `base * 2^(attempt-1)`, capped.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }

    /// Backoff with an explicit jitter term, capped at `max_delay`.
    pub fn backoff_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        self.base_backoff(attempt).saturating_add(jitter).min(self.max_delay)
    }

    /// Backoff before retry number `attempt` (1-based), with random jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
        };
        self.backoff_with_jitter(attempt, jitter)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
