// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token store: the session's access/refresh tokens, user snapshot, expiry
//! and activity timestamps.
//!
//! Tokens that fail structural validation or are already expired are purged
//! on read and refused on write, so callers only ever see usable tokens.

pub mod jwt;
pub mod medium;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::token::medium::{Expiring, PersistedSession, StorageMedium};
use crate::{epoch_ms, epoch_secs};

/// Refresh token and user snapshot lifetime on the medium.
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Identity snapshot returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The session store the refresh machinery depends on.
pub trait TokenStore: Send + Sync + 'static {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    /// Replace the access token, and the refresh token when one is given.
    fn set_tokens(&self, access: &str, refresh: Option<&str>) -> Result<(), TokenError>;
    /// Write a complete session in one step.
    fn set_session(&self, access: &str, refresh: &str, user: User) -> Result<(), TokenError>;
    fn user(&self) -> Option<User>;
    fn set_user(&self, user: User);
    fn clear(&self);
    fn is_empty(&self) -> bool;
    fn time_until_access_expiry(&self) -> Option<Duration>;
    /// Live refresh token and user present. A lapsed access token does not
    /// end the session, it only needs a refresh. Anything less is purged.
    fn has_valid_session(&self) -> bool;
    fn is_idle(&self) -> bool;
    fn touch_activity(&self);
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub refresh_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { refresh_lifetime: DEFAULT_REFRESH_LIFETIME, idle_timeout: DEFAULT_IDLE_TIMEOUT }
    }
}

/// [`TokenStore`] over a [`StorageMedium`].
pub struct SessionStore<M> {
    medium: M,
    settings: StoreSettings,
}

impl<M: StorageMedium> SessionStore<M> {
    pub fn new(medium: M) -> Self {
        Self::with_settings(medium, StoreSettings::default())
    }

    pub fn with_settings(medium: M, settings: StoreSettings) -> Self {
        Self { medium, settings }
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Load, drop expired fields, apply `f`.
    fn modify<R>(&self, f: impl FnOnce(&mut PersistedSession, u64) -> R) -> R {
        let now = epoch_secs();
        self.medium.update(|session| {
            session.prune(now);
            f(session, now)
        })
    }

    fn refresh_field_expiry(&self, refresh: &str, now: u64) -> Result<u64, TokenError> {
        let exp = jwt::validate(refresh, now)?;
        Ok(exp.min(now + self.settings.refresh_lifetime.as_secs()))
    }

    /// Expiry for fields that live as long as the refresh token.
    fn session_field_expiry(&self, session: &PersistedSession, now: u64) -> u64 {
        session
            .refresh_token
            .as_ref()
            .map(|r| r.expires_at)
            .unwrap_or(now + self.settings.refresh_lifetime.as_secs())
    }
}

fn store_access(session: &mut PersistedSession, access: &str, exp: u64) {
    session.access_token = Some(Expiring::new(access.to_owned(), exp));
    session.access_expires_at = Some(Expiring::new(exp, exp));
}

impl<M: StorageMedium> TokenStore for SessionStore<M> {
    fn access_token(&self) -> Option<String> {
        self.modify(|session, now| {
            let token = session.access_token.as_ref()?.value.clone();
            match jwt::validate(&token, now) {
                Ok(_) => Some(token),
                Err(e) => {
                    tracing::debug!(err = %e, "discarding unusable access token");
                    session.access_token = None;
                    session.access_expires_at = None;
                    None
                }
            }
        })
    }

    fn refresh_token(&self) -> Option<String> {
        self.modify(|session, now| {
            let token = session.refresh_token.as_ref()?.value.clone();
            match jwt::validate(&token, now) {
                Ok(_) => Some(token),
                Err(e) => {
                    tracing::debug!(err = %e, "discarding unusable refresh token");
                    session.refresh_token = None;
                    None
                }
            }
        })
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) -> Result<(), TokenError> {
        let now = epoch_secs();
        let exp = jwt::validate(access, now)?;
        let refresh_exp = refresh.map(|r| self.refresh_field_expiry(r, now)).transpose()?;
        self.modify(|session, _| {
            store_access(session, access, exp);
            if let (Some(token), Some(expires_at)) = (refresh, refresh_exp) {
                session.refresh_token = Some(Expiring::new(token.to_owned(), expires_at));
            }
        });
        Ok(())
    }

    fn set_session(&self, access: &str, refresh: &str, user: User) -> Result<(), TokenError> {
        let now = epoch_secs();
        let exp = jwt::validate(access, now)?;
        let refresh_exp = self.refresh_field_expiry(refresh, now)?;
        self.modify(|session, _| {
            *session = PersistedSession::default();
            store_access(session, access, exp);
            session.refresh_token = Some(Expiring::new(refresh.to_owned(), refresh_exp));
            session.user = Some(Expiring::new(user, refresh_exp));
            session.last_activity_at = Some(Expiring::new(epoch_ms(), refresh_exp));
        });
        Ok(())
    }

    fn user(&self) -> Option<User> {
        self.modify(|session, _| session.user.as_ref().map(|u| u.value.clone()))
    }

    fn set_user(&self, user: User) {
        self.modify(|session, now| {
            let expires_at = self.session_field_expiry(session, now);
            session.user = Some(Expiring::new(user, expires_at));
        });
    }

    fn clear(&self) {
        self.medium.update(|session| *session = PersistedSession::default());
    }

    fn is_empty(&self) -> bool {
        self.modify(|session, _| session.is_empty())
    }

    fn time_until_access_expiry(&self) -> Option<Duration> {
        self.modify(|session, now| {
            let exp = session.access_expires_at.as_ref()?.value;
            (exp > now).then(|| Duration::from_secs(exp - now))
        })
    }

    fn has_valid_session(&self) -> bool {
        self.modify(|session, now| {
            let usable =
                |t: &Option<Expiring<String>>| t.as_ref().is_some_and(|t| jwt::validate(&t.value, now).is_ok());
            if !usable(&session.access_token) {
                session.access_token = None;
                session.access_expires_at = None;
            }
            let complete = usable(&session.refresh_token) && session.user.is_some();
            if !complete && !session.is_empty() {
                tracing::debug!("purging partial session");
                *session = PersistedSession::default();
            }
            complete
        })
    }

    fn is_idle(&self) -> bool {
        let timeout_ms = self.settings.idle_timeout.as_millis() as u64;
        self.modify(|session, _| {
            session
                .last_activity_at
                .as_ref()
                .is_some_and(|at| epoch_ms().saturating_sub(at.value) > timeout_ms)
        })
    }

    fn touch_activity(&self) {
        self.modify(|session, now| {
            if session.refresh_token.is_none() && session.access_token.is_none() {
                return;
            }
            let expires_at = self.session_field_expiry(session, now);
            session.last_activity_at = Some(Expiring::new(epoch_ms(), expires_at));
        });
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
