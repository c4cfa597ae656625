// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token refresh: proactive scheduling, single-flight refresh, queued
//! replays, and cross-context sync.

mod coordinator;
pub mod schedule;

pub use coordinator::{CoordinatorSettings, EndReason, RefreshCoordinator};

use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_BUFFER_TIME: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunables for proactive refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Refresh this long before the access token expires.
    pub buffer_time: Duration,
    /// Floor between two successful refreshes.
    pub min_refresh_interval: Duration,
    /// Consecutive proactive failures before giving up until the next success.
    pub max_attempts: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            buffer_time: DEFAULT_BUFFER_TIME,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_time.is_zero() {
            return Err(ConfigError::invalid("buffer_time", "must be positive"));
        }
        if self.min_refresh_interval.is_zero() {
            return Err(ConfigError::invalid("min_refresh_interval", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Apply a partial update, yielding the merged config if it is valid.
    pub fn merged(&self, update: &RefreshConfigUpdate) -> Result<Self, ConfigError> {
        let next = Self {
            buffer_time: update.buffer_time.unwrap_or(self.buffer_time),
            min_refresh_interval: update.min_refresh_interval.unwrap_or(self.min_refresh_interval),
            max_attempts: update.max_attempts.unwrap_or(self.max_attempts),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Partial [`RefreshConfig`] change. Absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshConfigUpdate {
    pub buffer_time: Option<Duration>,
    pub min_refresh_interval: Option<Duration>,
    pub max_attempts: Option<u32>,
}

/// Coordinator lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scheduled,
    Refreshing,
    Disposed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scheduled => "scheduled",
            Self::Refreshing => "refreshing",
            Self::Disposed => "disposed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    /// Proactive refresh is armed or running.
    pub active: bool,
    pub refreshing: bool,
    pub phase: Phase,
    pub time_until_next_refresh_ms: Option<u64>,
    pub last_refresh_at_ms: Option<u64>,
    pub attempt_count: u32,
    pub time_until_expiry_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub refreshing: bool,
    pub queue_length: usize,
}
