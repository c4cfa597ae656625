// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::client::REFRESH_PATH;
use crate::refresh::{CoordinatorSettings, RefreshConfig};
use crate::retry::{RetryPolicy, MAX_BACKOFF, MAX_JITTER};
use crate::token::StoreSettings;

/// Configuration for a session client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// API base URL, including the `/api` prefix.
    #[arg(long, default_value = "http://127.0.0.1:8000/api", env = "PROCURA_BASE_URL")]
    pub base_url: String,

    /// Timeout for ordinary API calls in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "PROCURA_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Timeout for refresh calls in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "PROCURA_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Refresh this many milliseconds before the access token expires.
    #[arg(long, default_value_t = 120_000, env = "PROCURA_REFRESH_BUFFER_MS")]
    pub refresh_buffer_ms: u64,

    /// Minimum milliseconds between two successful refreshes.
    #[arg(long, default_value_t = 30_000, env = "PROCURA_MIN_REFRESH_INTERVAL_MS")]
    pub min_refresh_interval_ms: u64,

    /// Consecutive proactive refresh failures before giving up.
    #[arg(long, default_value_t = 3, env = "PROCURA_MAX_REFRESH_ATTEMPTS")]
    pub max_refresh_attempts: u32,

    /// Retries for network errors and 5xx responses.
    #[arg(long, default_value_t = 3, env = "PROCURA_MAX_RETRIES")]
    pub max_retries: u32,

    /// Base retry backoff in milliseconds.
    #[arg(long, default_value_t = 1000, env = "PROCURA_RETRY_BASE_MS")]
    pub retry_base_ms: u64,

    /// Inactivity after which the session is ended, in milliseconds.
    #[arg(long, default_value_t = 1_800_000, env = "PROCURA_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Login entry point to redirect to when a session ends.
    #[arg(long, default_value = "/login", env = "PROCURA_LOGIN_PATH")]
    pub login_path: String,

    /// Directory for the persisted session.
    #[arg(long, env = "PROCURA_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_owned(),
            request_timeout_ms: 60_000,
            refresh_timeout_ms: 10_000,
            refresh_buffer_ms: 120_000,
            min_refresh_interval_ms: 30_000,
            max_refresh_attempts: 3,
            max_retries: 3,
            retry_base_ms: 1000,
            idle_timeout_ms: 1_800_000,
            login_path: "/login".to_owned(),
            state_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http(s) URL");
        }
        if self.request_timeout_ms == 0 || self.refresh_timeout_ms == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        if self.idle_timeout_ms == 0 {
            anyhow::bail!("--idle-timeout-ms must be positive");
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("--login-path must start with '/'");
        }
        self.refresh_config().validate()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            buffer_time: Duration::from_millis(self.refresh_buffer_ms),
            min_refresh_interval: Duration::from_millis(self.min_refresh_interval_ms),
            max_attempts: self.max_refresh_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: MAX_BACKOFF,
            max_jitter: MAX_JITTER,
            refresh_path: REFRESH_PATH.to_owned(),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings { idle_timeout: self.idle_timeout(), ..StoreSettings::default() }
    }

    pub(crate) fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            refresh_path: REFRESH_PATH.to_owned(),
            login_path: self.login_path.clone(),
            refresh_timeout: self.refresh_timeout(),
        }
    }

    /// Explicit `--state-dir`, else the platform default.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn session_file(&self) -> PathBuf {
        self.resolved_state_dir().join("session.json")
    }
}

/// `$XDG_STATE_HOME/procura`, else `$HOME/.local/state/procura`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("procura");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/procura");
    }
    PathBuf::from(".procura")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
