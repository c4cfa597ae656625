// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redirect port used when a session ends for good.

use parking_lot::Mutex;

pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Where the application currently is, and how to move it.
pub trait Navigator: Send + Sync + 'static {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

/// Send the user to `login_path` unless already there.
pub fn redirect_to_login(navigator: &dyn Navigator, login_path: &str) -> bool {
    if navigator.current_path() == login_path {
        return false;
    }
    tracing::info!(to = login_path, "redirecting to login");
    navigator.navigate(login_path);
    true
}

/// Navigator for processes without a UI: tracks the current path and keeps
/// a history of redirects.
#[derive(Debug)]
pub struct HeadlessNavigator {
    inner: Mutex<NavState>,
}

#[derive(Debug)]
struct NavState {
    current: String,
    history: Vec<String>,
}

impl Default for HeadlessNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HeadlessNavigator {
    pub fn new(start: impl Into<String>) -> Self {
        Self { inner: Mutex::new(NavState { current: start.into(), history: Vec::new() }) }
    }

    /// Paths navigated to, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner.lock().history.clone()
    }
}

impl Navigator for HeadlessNavigator {
    fn current_path(&self) -> String {
        self.inner.lock().current.clone()
    }

    fn navigate(&self, path: &str) {
        let mut state = self.inner.lock();
        state.current = path.to_owned();
        state.history.push(path.to_owned());
    }
}
