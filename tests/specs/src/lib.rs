// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end flows.
//!
//! Runs an in-process mock of the procurement backend's auth and API
//! endpoints on a loopback port, so the real HTTP transport, refresh
//! coordinator and request pipeline can be exercised together. Also
//! locates the compiled `procura` binary for subprocess tests.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use procura_client::test_support::jwt_expiring_in;
use procura_client::{ClientConfig, SessionClient};

pub const PASSWORD: &str = "correct horse";

/// Resolve the path to the compiled `procura` binary.
pub fn procura_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("procura")
}

#[derive(Default)]
struct Ledger {
    access: HashSet<String>,
    refresh: HashSet<String>,
    blacklisted: Vec<String>,
    refresh_calls: u32,
    logins: u32,
    order_failures: u32,
    reject_refresh: bool,
    refresh_delay: Duration,
    access_ttl_secs: u64,
    upload_content_types: Vec<String>,
    order_hits: u32,
}

/// Handle to a running mock backend. The server task lives as long as the
/// test runtime.
#[derive(Clone)]
pub struct MockBackend {
    addr: SocketAddr,
    ledger: Arc<Mutex<Ledger>>,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let ledger =
            Arc::new(Mutex::new(Ledger { access_ttl_secs: 3600, ..Ledger::default() }));
        let app = Router::new()
            .route("/api/auth/token/", post(login))
            .route("/api/auth/token/refresh/", post(refresh))
            .route("/api/auth/logout/", post(logout))
            .route("/api/purchases/orders/", get(orders))
            .route("/api/documents/", post(documents))
            .with_state(Arc::clone(&ledger));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, ledger })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Client config pointed at this backend with fast retries.
    pub fn config(&self) -> ClientConfig {
        ClientConfig { base_url: self.base_url(), retry_base_ms: 10, ..ClientConfig::default() }
    }

    pub fn client(&self) -> anyhow::Result<SessionClient> {
        SessionClient::builder(self.config()).build()
    }

    /// Forget every issued access token, as if they all expired server-side.
    pub fn revoke_access_tokens(&self) {
        self.ledger.lock().access.clear();
    }

    /// Answer the next `n` order lookups with 503.
    pub fn fail_orders(&self, n: u32) {
        self.ledger.lock().order_failures = n;
    }

    pub fn reject_refresh(&self) {
        self.ledger.lock().reject_refresh = true;
    }

    pub fn delay_refresh(&self, delay: Duration) {
        self.ledger.lock().refresh_delay = delay;
    }

    pub fn set_access_ttl(&self, secs: u64) {
        self.ledger.lock().access_ttl_secs = secs;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.ledger.lock().refresh_calls
    }

    pub fn logins(&self) -> u32 {
        self.ledger.lock().logins
    }

    pub fn order_hits(&self) -> u32 {
        self.ledger.lock().order_hits
    }

    pub fn blacklisted(&self) -> Vec<String> {
        self.ledger.lock().blacklisted.clone()
    }

    pub fn upload_content_types(&self) -> Vec<String> {
        self.ledger.lock().upload_content_types.clone()
    }
}

type Shared = State<Arc<Mutex<Ledger>>>;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn authorized(ledger: &Ledger, headers: &HeaderMap) -> bool {
    bearer(headers).is_some_and(|token| ledger.access.contains(token))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "token not valid" }))).into_response()
}

fn mint_pair(ledger: &mut Ledger) -> (String, String) {
    let access = jwt_expiring_in(ledger.access_ttl_secs);
    let refresh = jwt_expiring_in(7 * 86400);
    ledger.access.insert(access.clone());
    ledger.refresh.insert(refresh.clone());
    (access, refresh)
}

async fn login(State(ledger): Shared, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return unauthorized();
    }
    let mut ledger = ledger.lock();
    ledger.logins += 1;
    let (access, refresh) = mint_pair(&mut ledger);
    Json(json!({
        "access": access,
        "refresh": refresh,
        "user": { "id": 7, "username": body["username"], "email": "alice@example.com", "role": "requester" },
    }))
    .into_response()
}

async fn refresh(State(ledger): Shared, Json(body): Json<Value>) -> Response {
    let delay = {
        let mut ledger = ledger.lock();
        ledger.refresh_calls += 1;
        ledger.refresh_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut ledger = ledger.lock();
    let presented = body["refresh"].as_str().unwrap_or_default().to_owned();
    if ledger.reject_refresh || !ledger.refresh.remove(&presented) {
        return unauthorized();
    }
    let (access, refresh) = mint_pair(&mut ledger);
    Json(json!({ "access": access, "refresh": refresh })).into_response()
}

async fn logout(State(ledger): Shared, Json(body): Json<Value>) -> Response {
    let mut ledger = ledger.lock();
    if let Some(token) = body["refresh"].as_str() {
        ledger.refresh.remove(token);
        ledger.blacklisted.push(token.to_owned());
    }
    StatusCode::RESET_CONTENT.into_response()
}

async fn orders(State(ledger): Shared, headers: HeaderMap) -> Response {
    let mut ledger = ledger.lock();
    ledger.order_hits += 1;
    if !authorized(&ledger, &headers) {
        return unauthorized();
    }
    if ledger.order_failures > 0 {
        ledger.order_failures -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream busy").into_response();
    }
    Json(json!({ "results": [{ "id": 1, "status": "open" }] })).into_response()
}

async fn documents(State(ledger): Shared, headers: HeaderMap, body: bytes::Bytes) -> Response {
    let mut ledger = ledger.lock();
    if !authorized(&ledger, &headers) {
        return unauthorized();
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    ledger.upload_content_types.push(content_type);
    (StatusCode::CREATED, Json(json!({ "id": 42, "size": body.len() }))).into_response()
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
