// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Procura client: session-aware API client for the procurement backend.
//!
//! Keeps short-lived access tokens fresh (proactive refresh ahead of expiry),
//! funnels concurrent refreshes through a single in-flight call, replays
//! requests that hit a 401 once a fresh token lands, retries transient
//! failures with jittered backoff, and keeps sibling contexts that share one
//! token store in sync through an event bus.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod navigate;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod retry;
pub mod test_support;
pub mod token;
pub mod transport;

pub use client::{SessionClient, SessionClientBuilder};
pub use config::ClientConfig;
pub use error::{ApiError, ConfigError, RefreshError, TokenError};

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Current wall-clock time as epoch seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current wall-clock time as epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
