// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage media for the persisted session.
//!
//! A medium is shared by every context of the same origin: clone a
//! [`MemoryMedium`] to hand it to sibling contexts in one process, or point
//! several [`FileMedium`]s at the same file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::token::User;

/// A stored value with its own expiry (epoch seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiring<T> {
    pub value: T,
    pub expires_at: u64,
}

impl<T> Expiring<T> {
    pub fn new(value: T, expires_at: u64) -> Self {
        Self { value, expires_at }
    }

    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// On-medium session layout: five independently expiring fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Expiring<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Expiring<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Expiring<User>>,
    /// Access token `exp`, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<Expiring<u64>>,
    /// Last successful API response, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<Expiring<u64>>,
}

impl PersistedSession {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.user.is_none()
            && self.access_expires_at.is_none()
            && self.last_activity_at.is_none()
    }

    /// Drop every field whose own expiry has passed.
    pub fn prune(&mut self, now: u64) {
        fn keep<T>(field: &mut Option<Expiring<T>>, now: u64) {
            if field.as_ref().is_some_and(|f| !f.is_live(now)) {
                *field = None;
            }
        }
        keep(&mut self.access_token, now);
        keep(&mut self.refresh_token, now);
        keep(&mut self.user, now);
        keep(&mut self.access_expires_at, now);
        keep(&mut self.last_activity_at, now);
    }
}

/// Where the persisted session lives.
pub trait StorageMedium: Send + Sync + 'static {
    fn load(&self) -> PersistedSession;

    /// Read-modify-write under the medium's lock. Saves only on change.
    fn update<R>(&self, f: impl FnOnce(&mut PersistedSession) -> R) -> R;
}

/// In-process shared cell. Clones share the same session.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    cell: Arc<Mutex<PersistedSession>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageMedium for MemoryMedium {
    fn load(&self) -> PersistedSession {
        self.cell.lock().clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut PersistedSession) -> R) -> R {
        let mut guard = self.cell.lock();
        f(&mut *guard)
    }
}

/// JSON file written atomically (write tmp + rename).
///
/// I/O failures are logged and the session behaves as empty; a broken
/// state file must never take the client down.
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> PersistedSession {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PersistedSession::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "failed to read session file");
                return PersistedSession::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "corrupt session file, ignoring");
                PersistedSession::default()
            }
        }
    }

    fn write(&self, session: &PersistedSession) {
        if session.is_empty() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), err = %e, "failed to remove session file")
                }
            }
            return;
        }
        if let Err(e) = save_atomic(&self.path, session) {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to persist session");
        }
    }
}

impl StorageMedium for FileMedium {
    fn load(&self) -> PersistedSession {
        let _guard = self.lock.lock();
        self.read()
    }

    fn update<R>(&self, f: impl FnOnce(&mut PersistedSession) -> R) -> R {
        let _guard = self.lock.lock();
        let before = self.read();
        let mut session = before.clone();
        let out = f(&mut session);
        if session != before {
            self.write(&session);
        }
        out
    }
}

/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// share a `.tmp` file.
fn save_atomic(path: &Path, session: &PersistedSession) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(session)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
