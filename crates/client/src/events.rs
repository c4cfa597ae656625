// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context auth events.
//!
//! A [`BroadcastHub`] plays the role of the shared origin: every context that
//! shares a token store joins the same hub and gets a [`ContextChannel`].
//! Events go to every other context, never back to the publisher. Delivery is
//! best effort: publishing with nobody listening is fine, and a subscriber
//! that falls behind skips what it missed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEventKind {
    #[serde(rename = "TOKEN_REFRESH")]
    Refreshed,
    #[serde(rename = "LOGOUT")]
    LoggedOut,
    #[serde(rename = "LOGIN")]
    LoggedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    #[serde(rename = "type")]
    pub kind: AuthEventKind,
    pub timestamp_ms: u64,
}

impl AuthEvent {
    pub fn now(kind: AuthEventKind) -> Self {
        Self { kind, timestamp_ms: crate::epoch_ms() }
    }
}

/// Outbound port for auth announcements.
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, kind: AuthEventKind);
}

/// Bus for a context with no siblings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl EventBus for NoopBus {
    fn publish(&self, _kind: AuthEventKind) {}
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    event: AuthEvent,
}

/// Shared medium all same-origin contexts join.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Envelope>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new context on this hub.
    pub fn join(&self) -> ContextChannel {
        ContextChannel { id: Uuid::new_v4(), tx: self.tx.clone() }
    }
}

/// One context's handle on the hub.
#[derive(Debug, Clone)]
pub struct ContextChannel {
    id: Uuid,
    tx: broadcast::Sender<Envelope>,
}

impl ContextChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive events published by other contexts from now on.
    pub fn subscribe(&self) -> ContextSubscription {
        ContextSubscription { id: self.id, rx: self.tx.subscribe() }
    }
}

impl EventBus for ContextChannel {
    fn publish(&self, kind: AuthEventKind) {
        let event = AuthEvent::now(kind);
        tracing::debug!(context = %self.id, event = ?event.kind, "publishing auth event");
        // No receivers is not an error.
        let _ = self.tx.send(Envelope { origin: self.id, event });
    }
}

pub struct ContextSubscription {
    id: Uuid,
    rx: broadcast::Receiver<Envelope>,
}

impl ContextSubscription {
    /// Next event from a sibling context. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(env) if env.origin == self.id => continue,
                Ok(env) => return Some(env.event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(context = %self.id, skipped = n, "auth event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
