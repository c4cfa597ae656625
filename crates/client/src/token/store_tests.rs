// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::medium::{Expiring, FileMedium, MemoryMedium, PersistedSession, StorageMedium};
use super::*;
use crate::test_support::{jwt_expiring_in, jwt_with_exp, test_user};

fn memory_store() -> SessionStore<MemoryMedium> {
    SessionStore::new(MemoryMedium::new())
}

fn logged_in() -> anyhow::Result<SessionStore<MemoryMedium>> {
    let store = memory_store();
    store.set_session(&jwt_expiring_in(3600), &jwt_expiring_in(7 * 86400), test_user())?;
    Ok(store)
}

#[test]
fn set_session_makes_valid_session() -> anyhow::Result<()> {
    let store = logged_in()?;
    assert!(store.has_valid_session());
    assert!(store.access_token().is_some());
    assert!(store.refresh_token().is_some());
    assert_eq!(store.user(), Some(test_user()));
    assert!(!store.is_idle());
    Ok(())
}

#[test]
fn time_until_expiry_tracks_exp_claim() -> anyhow::Result<()> {
    let store = memory_store();
    store.set_session(&jwt_expiring_in(600), &jwt_expiring_in(86400), test_user())?;
    let remaining = store.time_until_access_expiry().ok_or_else(|| anyhow::anyhow!("no expiry"))?;
    assert!(remaining <= Duration::from_secs(600));
    assert!(remaining >= Duration::from_secs(598));
    Ok(())
}

#[test]
fn malformed_access_token_is_refused() {
    let store = memory_store();
    let result = store.set_tokens("not-a-jwt", None);
    assert!(matches!(result, Err(TokenError::Malformed(_))));
    assert!(store.is_empty());
}

#[test]
fn expired_access_token_is_refused() {
    let store = memory_store();
    let expired = jwt_with_exp(crate::epoch_secs() - 10);
    assert_eq!(store.set_tokens(&expired, None), Err(TokenError::Expired));
}

#[test]
fn stored_expired_token_is_purged_on_read() {
    let medium = MemoryMedium::new();
    let now = crate::epoch_secs();
    medium.update(|s| {
        // Field lifetime still live, token itself already expired.
        s.access_token = Some(Expiring::new(jwt_with_exp(now - 5), now + 100));
        s.access_expires_at = Some(Expiring::new(now - 5, now + 100));
    });
    let store = SessionStore::new(medium.clone());
    assert_eq!(store.access_token(), None);
    assert!(medium.load().access_token.is_none());
    assert!(medium.load().access_expires_at.is_none());
}

#[test]
fn stored_garbage_token_is_purged_on_read() {
    let medium = MemoryMedium::new();
    let now = crate::epoch_secs();
    medium.update(|s| s.refresh_token = Some(Expiring::new("garbage".to_owned(), now + 100)));
    let store = SessionStore::new(medium.clone());
    assert_eq!(store.refresh_token(), None);
    assert!(medium.load().is_empty());
}

#[test]
fn set_tokens_keeps_refresh_token_without_rotation() -> anyhow::Result<()> {
    let store = logged_in()?;
    let refresh_before = store.refresh_token();
    let new_access = jwt_expiring_in(3600);
    store.set_tokens(&new_access, None)?;
    assert_eq!(store.access_token(), Some(new_access));
    assert_eq!(store.refresh_token(), refresh_before);
    Ok(())
}

#[test]
fn set_tokens_rotates_refresh_token() -> anyhow::Result<()> {
    let store = logged_in()?;
    let rotated = jwt_expiring_in(7 * 86400 - 1);
    store.set_tokens(&jwt_expiring_in(3600), Some(&rotated))?;
    assert_eq!(store.refresh_token(), Some(rotated));
    Ok(())
}

#[test]
fn partial_session_is_purged() -> anyhow::Result<()> {
    let store = memory_store();
    store.set_tokens(&jwt_expiring_in(3600), Some(&jwt_expiring_in(86400)))?;
    // No user snapshot: partial.
    assert!(!store.has_valid_session());
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn lapsed_access_token_keeps_refreshable_session() -> anyhow::Result<()> {
    let medium = MemoryMedium::new();
    let store = SessionStore::new(medium.clone());
    let refresh = jwt_expiring_in(7 * 86400);
    store.set_session(&jwt_expiring_in(3600), &refresh, test_user())?;
    let now = crate::epoch_secs();
    medium.update(|s| {
        s.access_token = Some(Expiring::new(jwt_with_exp(now - 60), now - 60));
        s.access_expires_at = Some(Expiring::new(now - 60, now - 60));
    });

    assert!(store.has_valid_session());
    assert_eq!(store.access_token(), None);
    assert_eq!(store.time_until_access_expiry(), None);
    assert_eq!(store.refresh_token(), Some(refresh));
    assert_eq!(store.user(), Some(test_user()));
    Ok(())
}

#[test]
fn missing_refresh_token_is_partial() -> anyhow::Result<()> {
    let medium = MemoryMedium::new();
    let store = SessionStore::new(medium.clone());
    store.set_session(&jwt_expiring_in(3600), &jwt_expiring_in(86400), test_user())?;
    medium.update(|s| s.refresh_token = None);

    assert!(!store.has_valid_session());
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn expired_field_lifetime_drops_field() {
    let medium = MemoryMedium::new();
    let now = crate::epoch_secs();
    medium.update(|s| s.user = Some(Expiring::new(test_user(), now - 1)));
    let store = SessionStore::new(medium);
    assert_eq!(store.user(), None);
}

#[test]
fn clear_is_idempotent() -> anyhow::Result<()> {
    let store = logged_in()?;
    store.clear();
    assert!(store.is_empty());
    store.clear();
    assert!(store.is_empty());
    assert!(!store.has_valid_session());
    Ok(())
}

#[test]
fn idle_after_timeout() -> anyhow::Result<()> {
    let medium = MemoryMedium::new();
    let settings = StoreSettings { idle_timeout: Duration::from_secs(60), ..StoreSettings::default() };
    let store = SessionStore::with_settings(medium.clone(), settings);
    store.set_session(&jwt_expiring_in(3600), &jwt_expiring_in(86400), test_user())?;
    assert!(!store.is_idle());

    let now = crate::epoch_secs();
    medium.update(|s| {
        s.last_activity_at = Some(Expiring::new(crate::epoch_ms() - 61_000, now + 86400));
    });
    assert!(store.is_idle());

    store.touch_activity();
    assert!(!store.is_idle());
    Ok(())
}

#[test]
fn touch_activity_on_empty_store_is_noop() {
    let store = memory_store();
    store.touch_activity();
    assert!(store.is_empty());
}

#[test]
fn memory_medium_is_shared_between_clones() -> anyhow::Result<()> {
    let medium = MemoryMedium::new();
    let a = SessionStore::new(medium.clone());
    let b = SessionStore::new(medium);
    a.set_session(&jwt_expiring_in(3600), &jwt_expiring_in(86400), test_user())?;
    assert!(b.has_valid_session());
    b.clear();
    assert!(a.is_empty());
    Ok(())
}

#[test]
fn file_medium_persists_across_instances() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("session.json");

    let store = SessionStore::new(FileMedium::new(&path));
    store.set_session(&jwt_expiring_in(3600), &jwt_expiring_in(86400), test_user())?;
    assert!(path.exists());

    let reopened = SessionStore::new(FileMedium::new(&path));
    assert!(reopened.has_valid_session());
    assert_eq!(reopened.user(), Some(test_user()));

    reopened.clear();
    assert!(!path.exists());
    Ok(())
}

#[test]
fn corrupt_file_reads_as_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json")?;
    let medium = FileMedium::new(&path);
    assert_eq!(medium.load(), PersistedSession::default());
    Ok(())
}
