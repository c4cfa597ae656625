// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token minting, a scripted transport, and
//! assertion helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::client::SessionClient;
use crate::config::ClientConfig;
use crate::events::{AuthEventKind, EventBus};
use crate::navigate::HeadlessNavigator;
use crate::request::{ApiResponse, Method, PreparedRequest, RequestBody};
use crate::retry::RetryDescriptor;
use crate::token::medium::MemoryMedium;
use crate::token::{SessionStore, TokenStore, User};
use crate::transport::{Transport, TransportError, TransportErrorKind, TransportFuture};

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(1);

/// Unsigned JWT-shaped token with the given `exp`. Every call yields a
/// distinct token.
pub fn jwt_with_exp(exp: u64) -> String {
    let jti = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "jti": jti }).to_string());
    format!("{header}.{payload}.sig")
}

/// Token expiring `secs` seconds from now (wall clock).
pub fn jwt_expiring_in(secs: u64) -> String {
    jwt_with_exp(crate::epoch_secs() + secs)
}

pub fn test_user() -> User {
    User {
        id: 7,
        username: "alice".to_owned(),
        email: "alice@example.com".to_owned(),
        role: Some("requester".to_owned()),
    }
}

/// In-memory store holding a full session whose access token has
/// `access_secs` left.
pub fn seeded_store(access_secs: u64) -> anyhow::Result<Arc<SessionStore<MemoryMedium>>> {
    let store = SessionStore::new(MemoryMedium::default());
    store.set_session(&jwt_expiring_in(access_secs), &jwt_expiring_in(7 * 86400), test_user())?;
    Ok(Arc::new(store))
}

/// Body of a successful refresh response.
pub fn refresh_body(access_secs: u64) -> Value {
    json!({
        "access": jwt_expiring_in(access_secs),
        "refresh": jwt_expiring_in(7 * 86400),
    })
}

/// Scripted outcome for one call on a [`FakeTransport`].
#[derive(Debug, Clone)]
pub enum FakeReply {
    Respond(u16, Value),
    Fail(TransportErrorKind),
    Delayed(Duration, Box<FakeReply>),
}

impl FakeReply {
    pub fn ok(body: Value) -> Self {
        Self::Respond(200, body)
    }

    pub fn status(status: u16) -> Self {
        Self::Respond(status, json!({ "detail": format!("status {status}") }))
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// What the transport saw for one attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub credential: Option<String>,
    pub retry: RetryDescriptor,
    pub body: RequestBody,
    pub timeout: Duration,
}

type Handler = dyn Fn(&RecordedCall) -> FakeReply + Send + Sync;

/// Transport that answers from a handler closure and records every call.
pub struct FakeTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new(handler: impl Fn(&RecordedCall) -> FakeReply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()) })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls whose path matches `path`, ignoring a trailing slash.
    pub fn calls_to(&self, path: &str) -> usize {
        let want = path.trim_end_matches('/');
        self.calls.lock().iter().filter(|c| c.path.trim_end_matches('/') == want).count()
    }
}

impl Transport for FakeTransport {
    fn send<'a>(&'a self, request: &'a PreparedRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let call = RecordedCall {
                method: request.descriptor.method,
                path: request.descriptor.path.clone(),
                headers: request.descriptor.headers.clone(),
                credential: request.credential.clone(),
                retry: request.retry,
                body: request.descriptor.body.clone(),
                timeout: request.timeout,
            };
            let mut reply = (self.handler)(&call);
            self.calls.lock().push(call);
            loop {
                match reply {
                    FakeReply::Delayed(delay, next) => {
                        tokio::time::sleep(delay).await;
                        reply = *next;
                    }
                    FakeReply::Respond(status, body) => {
                        let bytes = serde_json::to_vec(&body).unwrap_or_default();
                        let mut response = ApiResponse::new(status, bytes);
                        response.headers.push(("content-type".to_owned(), "application/json".to_owned()));
                        return Ok(response);
                    }
                    FakeReply::Fail(kind) => {
                        return Err(TransportError::new(kind, "injected failure"));
                    }
                }
            }
        })
    }
}

/// Event bus that remembers what was published.
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<AuthEventKind>>,
}

impl RecordingBus {
    pub fn published(&self) -> Vec<AuthEventKind> {
        self.published.lock().clone()
    }

    pub fn count(&self, kind: AuthEventKind) -> usize {
        self.published.lock().iter().filter(|k| **k == kind).count()
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, kind: AuthEventKind) {
        self.published.lock().push(kind);
    }
}

/// A session client wired to fakes, with handles on each of them.
pub struct Rig {
    pub client: SessionClient,
    pub store: Arc<SessionStore<MemoryMedium>>,
    pub transport: Arc<FakeTransport>,
    pub bus: Arc<RecordingBus>,
    pub navigator: Arc<HeadlessNavigator>,
}

/// Build a [`Rig`] with default config. Needs a tokio runtime.
pub fn rig(
    store: Arc<SessionStore<MemoryMedium>>,
    transport: Arc<FakeTransport>,
) -> anyhow::Result<Rig> {
    rig_with(ClientConfig::default(), store, transport)
}

pub fn rig_with(
    config: ClientConfig,
    store: Arc<SessionStore<MemoryMedium>>,
    transport: Arc<FakeTransport>,
) -> anyhow::Result<Rig> {
    let bus = Arc::new(RecordingBus::default());
    let navigator = Arc::new(HeadlessNavigator::new("/dashboard"));
    let client = SessionClient::builder(config)
        .store(store.clone())
        .bus(bus.clone())
        .navigator(navigator.clone())
        .transport(transport.clone())
        .build()?;
    Ok(Rig { client, store, transport, bus, navigator })
}

/// Let spawned tasks run without moving far on a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
