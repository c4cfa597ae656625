// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::{plan_proactive, proactive_retry_delay, ProactivePlan};
use super::{Phase, QueueStatus, RefreshConfig, RefreshConfigUpdate, RefreshStatus};
use crate::epoch_ms;
use crate::error::{ApiError, ConfigError, RefreshError};
use crate::events::{AuthEvent, AuthEventKind, ContextSubscription, EventBus};
use crate::navigate::{redirect_to_login, Navigator};
use crate::pipeline::Dispatcher;
use crate::request::{ApiResponse, PreparedRequest, RequestDescriptor};
use crate::retry::RetryDescriptor;
use crate::token::TokenStore;
use crate::transport::Transport;

/// Fixed wiring for a [`RefreshCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub refresh_path: String,
    pub login_path: String,
    pub refresh_timeout: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Logout,
    Idle,
    RefreshFailed,
    /// A sibling context logged out; do not announce it again.
    SiblingLogout,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Idle => "idle",
            Self::RefreshFailed => "refresh_failed",
            Self::SiblingLogout => "sibling_logout",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Proactive,
    Request,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Proactive => "proactive",
            Self::Request => "request",
            Self::Manual => "manual",
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

type Settle = oneshot::Sender<Result<ApiResponse, ApiError>>;
type Joiner = oneshot::Sender<Result<(), RefreshError>>;

/// A request parked behind the in-flight refresh.
struct QueuedRequest {
    descriptor: Arc<RequestDescriptor>,
    settle: Settle,
}

struct ScheduledTimer {
    handle: AbortHandle,
    fires_at: Instant,
    generation: u64,
}

struct CoordinatorState {
    config: RefreshConfig,
    refreshing: bool,
    queue: VecDeque<QueuedRequest>,
    joiners: Vec<Joiner>,
    attempt_count: u32,
    timer: Option<ScheduledTimer>,
    timer_generation: u64,
    /// Bumped whenever a session starts or ends; a refresh that settles
    /// under a different epoch is discarded.
    session_epoch: u64,
    active: bool,
    last_refresh_at: Option<Instant>,
    last_refresh_at_ms: Option<u64>,
    disposed: bool,
}

/// Work left over after a session ends, run once the state lock is released.
struct Teardown {
    reason: EndReason,
    announce: bool,
    cause: RefreshError,
    queue: Vec<QueuedRequest>,
    joiners: Vec<Joiner>,
}

enum ReplayPlan {
    Now(String),
    Wait(oneshot::Receiver<Result<ApiResponse, ApiError>>),
}

/// Owns every refresh of one context: the proactive timer, the single
/// in-flight refresh, and the queue of requests waiting on it.
pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    bus: Arc<dyn EventBus>,
    navigator: Arc<dyn Navigator>,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    settings: CoordinatorSettings,
    state: Mutex<CoordinatorState>,
    shutdown: CancellationToken,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        store: Arc<dyn TokenStore>,
        bus: Arc<dyn EventBus>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        settings: CoordinatorSettings,
        config: RefreshConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            navigator,
            transport,
            dispatcher,
            settings,
            state: Mutex::new(CoordinatorState {
                config,
                refreshing: false,
                queue: VecDeque::new(),
                joiners: Vec::new(),
                attempt_count: 0,
                timer: None,
                timer_generation: 0,
                session_epoch: 0,
                active: false,
                last_refresh_at: None,
                last_refresh_at_ms: None,
                disposed: false,
            }),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        phase_of(&self.state.lock())
    }

    pub fn config(&self) -> RefreshConfig {
        self.state.lock().config
    }

    /// Clear the attempt counter and reschedule from the stored session.
    pub fn reset(self: &Arc<Self>) {
        let teardown = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.attempt_count = 0;
            self.schedule_next(&mut st)
        };
        self.finish(teardown);
    }

    /// A new session was written to the store by this context.
    pub(crate) fn begin_session(self: &Arc<Self>) {
        let (queue, joiners, teardown) = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.session_epoch += 1;
            st.attempt_count = 0;
            st.refreshing = false;
            let queue: Vec<_> = st.queue.drain(..).collect();
            let joiners = std::mem::take(&mut st.joiners);
            (queue, joiners, self.schedule_next(&mut st))
        };
        // Anything still waiting on a refresh from before the login can use
        // the new session's token.
        self.drain(queue);
        for joiner in joiners {
            let _ = joiner.send(Ok(()));
        }
        self.finish(teardown);
    }

    /// Merge `update` into the config and reschedule. Invalid updates leave
    /// the config unchanged.
    pub fn configure(self: &Arc<Self>, update: RefreshConfigUpdate) -> Result<(), ConfigError> {
        let teardown = {
            let mut st = self.state.lock();
            let next = st.config.merged(&update)?;
            st.config = next;
            info!(
                buffer_ms = next.buffer_time.as_millis() as u64,
                min_interval_ms = next.min_refresh_interval.as_millis() as u64,
                max_attempts = next.max_attempts,
                "refresh config updated"
            );
            if st.disposed {
                return Ok(());
            }
            self.schedule_next(&mut st)
        };
        self.finish(teardown);
        Ok(())
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn manual_refresh(self: &Arc<Self>) -> bool {
        match self.refresh(Trigger::Manual).await {
            Ok(()) => true,
            Err(e) => {
                warn!(err = %e, "manual refresh failed");
                false
            }
        }
    }

    async fn refresh(self: &Arc<Self>, trigger: Trigger) -> Result<(), RefreshError> {
        let rx = {
            let mut st = self.state.lock();
            if st.disposed {
                return Err(RefreshError::SessionEnded);
            }
            let (tx, rx) = oneshot::channel();
            st.joiners.push(tx);
            if !st.refreshing {
                self.begin_refresh(&mut st, trigger);
            }
            rx
        };
        rx.await.unwrap_or(Err(RefreshError::SessionEnded))
    }

    /// Settle a request that was rejected with 401 using `rejected` as its
    /// credential: replay it with a fresh token once one is available.
    pub async fn replay_after_refresh(
        self: &Arc<Self>,
        descriptor: Arc<RequestDescriptor>,
        rejected: Option<String>,
    ) -> Result<ApiResponse, ApiError> {
        let plan = {
            let mut st = self.state.lock();
            if st.disposed {
                return Err(ApiError::SessionEnded);
            }
            let rotated = match (st.refreshing, self.store.access_token()) {
                (false, Some(current)) if rejected.as_deref() != Some(current.as_str()) => {
                    Some(current)
                }
                _ => None,
            };
            match rotated {
                Some(current) => ReplayPlan::Now(current),
                None => {
                    let (tx, rx) = oneshot::channel();
                    st.queue.push_back(QueuedRequest { descriptor: Arc::clone(&descriptor), settle: tx });
                    debug!(path = %descriptor.path, queued = st.queue.len(), "request queued behind refresh");
                    if !st.refreshing {
                        self.begin_refresh(&mut st, Trigger::Request);
                    }
                    ReplayPlan::Wait(rx)
                }
            }
        };
        match plan {
            ReplayPlan::Now(token) => {
                debug!(path = %descriptor.path, "token already rotated, replaying");
                self.dispatcher.replay(descriptor, token).await
            }
            ReplayPlan::Wait(rx) => rx.await.unwrap_or(Err(ApiError::SessionEnded)),
        }
    }

    pub fn status(&self) -> RefreshStatus {
        let st = self.state.lock();
        let now = Instant::now();
        RefreshStatus {
            active: st.active,
            refreshing: st.refreshing,
            phase: phase_of(&st),
            time_until_next_refresh_ms: st
                .timer
                .as_ref()
                .map(|t| t.fires_at.saturating_duration_since(now).as_millis() as u64),
            last_refresh_at_ms: st.last_refresh_at_ms,
            attempt_count: st.attempt_count,
            time_until_expiry_ms: self.store.time_until_access_expiry().map(|d| d.as_millis() as u64),
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        let st = self.state.lock();
        QueueStatus { refreshing: st.refreshing, queue_length: st.queue.len() }
    }

    /// Purge the session, reject everything waiting, announce (unless the
    /// news came from a sibling), and redirect to login.
    pub fn end_session(self: &Arc<Self>, reason: EndReason) {
        let teardown = {
            let mut st = self.state.lock();
            Some(self.terminate(&mut st, reason, RefreshError::SessionEnded))
        };
        self.finish(teardown);
    }

    /// Stop timers and listeners and reject pending work. The store is left
    /// alone, except that a refresh already in flight still stores the
    /// tokens the server rotated to.
    pub fn dispose(&self) {
        let (queue, joiners) = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            st.active = false;
            cancel_timer(&mut st);
            (st.queue.drain(..).collect::<Vec<_>>(), std::mem::take(&mut st.joiners))
        };
        self.shutdown.cancel();
        debug!(rejected = queue.len() + joiners.len(), "refresh coordinator disposed");
        reject_all(queue, joiners, RefreshError::SessionEnded);
    }

    /// React to sibling contexts' announcements until disposed.
    pub fn spawn_sync_listener(self: &Arc<Self>, mut subscription: ContextSubscription) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = subscription.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(this) = weak.upgrade() else { break };
                this.on_sibling_event(event);
            }
        });
    }

    fn on_sibling_event(self: &Arc<Self>, event: AuthEvent) {
        debug!(event = ?event.kind, at = event.timestamp_ms, "auth event from sibling context");
        let teardown = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            match event.kind {
                AuthEventKind::Refreshed | AuthEventKind::LoggedIn if st.refreshing => None,
                AuthEventKind::Refreshed | AuthEventKind::LoggedIn => {
                    st.attempt_count = 0;
                    self.schedule_next(&mut st)
                }
                AuthEventKind::LoggedOut => {
                    Some(self.terminate(&mut st, EndReason::SiblingLogout, RefreshError::SessionEnded))
                }
            }
        };
        self.finish(teardown);
    }

    fn begin_refresh(self: &Arc<Self>, st: &mut CoordinatorState, trigger: Trigger) {
        st.refreshing = true;
        cancel_timer(st);
        let epoch = st.session_epoch;
        info!(trigger = trigger.as_str(), "refreshing access token");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.call_refresh_endpoint().await;
            this.settle(epoch, outcome);
        });
    }

    /// `Ok(None)` means a sibling already rotated the tokens.
    async fn call_refresh_endpoint(&self) -> Result<Option<RefreshResponse>, RefreshError> {
        let refresh = self.store.refresh_token().ok_or(RefreshError::NoRefreshToken)?;
        let descriptor = RequestDescriptor::post(self.settings.refresh_path.as_str())
            .json(serde_json::json!({ "refresh": refresh }));
        let request = PreparedRequest {
            descriptor: Arc::new(descriptor),
            credential: None,
            retry: RetryDescriptor::default(),
            timeout: self.settings.refresh_timeout,
        };
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RefreshError::Network { kind: e.kind, message: e.message })?;
        match response.status {
            s if (200..300).contains(&s) => {}
            401 | 403 if self.rotated_elsewhere(&refresh) => {
                debug!("refresh token rotated by a sibling context");
                return Ok(None);
            }
            status @ (401 | 403) => return Err(RefreshError::Rejected { status }),
            status => return Err(RefreshError::Status { status }),
        }
        response.json::<RefreshResponse>().map(Some).map_err(|e| RefreshError::Malformed(e.to_string()))
    }

    fn rotated_elsewhere(&self, sent: &str) -> bool {
        self.store.refresh_token().is_some_and(|current| current != sent)
            && self.store.access_token().is_some()
    }

    fn settle(self: &Arc<Self>, epoch: u64, outcome: Result<Option<RefreshResponse>, RefreshError>) {
        let mut st = self.state.lock();
        if st.session_epoch != epoch {
            // The session this refresh belonged to has ended; its waiters
            // were rejected then, and anything queued now is a newer one's.
            drop(st);
            debug!("refresh settled after its session ended");
            return;
        }
        st.refreshing = false;

        // Written under the lock so a concurrent logout cannot be undone.
        // Still written after dispose: the server has already rotated.
        let outcome = outcome.and_then(|tokens| match tokens {
            Some(t) => self
                .store
                .set_tokens(&t.access, t.refresh.as_deref())
                .map_err(|e| RefreshError::Malformed(e.to_string())),
            None => Ok(()),
        });

        if st.disposed {
            let queue: Vec<_> = st.queue.drain(..).collect();
            let joiners = std::mem::take(&mut st.joiners);
            drop(st);
            debug!(ok = outcome.is_ok(), "refresh settled after dispose");
            reject_all(queue, joiners, RefreshError::SessionEnded);
            return;
        }

        match outcome {
            Ok(()) => {
                st.attempt_count = 0;
                st.last_refresh_at = Some(Instant::now());
                st.last_refresh_at_ms = Some(epoch_ms());
                let queue: Vec<_> = st.queue.drain(..).collect();
                let joiners = std::mem::take(&mut st.joiners);
                let teardown = self.schedule_next(&mut st);
                drop(st);
                info!(queued = queue.len(), "access token refreshed");
                self.bus.publish(AuthEventKind::Refreshed);
                self.drain(queue);
                for joiner in joiners {
                    let _ = joiner.send(Ok(()));
                }
                self.finish(teardown);
            }
            Err(e) if e.is_unrecoverable() => {
                warn!(err = %e, "refresh failed, ending session");
                let teardown = self.terminate(&mut st, EndReason::RefreshFailed, e);
                drop(st);
                self.finish(Some(teardown));
            }
            Err(e) => {
                st.attempt_count += 1;
                let attempt = st.attempt_count;
                if attempt < st.config.max_attempts {
                    let delay = proactive_retry_delay(attempt);
                    warn!(err = %e, attempt, retry_in_ms = delay.as_millis() as u64, "refresh failed, will retry");
                    st.active = true;
                    self.arm(&mut st, delay);
                } else {
                    warn!(err = %e, attempt, "refresh failed, giving up on proactive refresh");
                    st.active = false;
                    cancel_timer(&mut st);
                }
                let queue: Vec<_> = st.queue.drain(..).collect();
                let joiners = std::mem::take(&mut st.joiners);
                drop(st);
                reject_all(queue, joiners, e);
            }
        }
    }

    /// Replay every queued request with the fresh token, in parallel.
    fn drain(&self, queue: Vec<QueuedRequest>) {
        if queue.is_empty() {
            return;
        }
        let Some(token) = self.store.access_token() else {
            reject_all(queue, Vec::new(), RefreshError::SessionEnded);
            return;
        };
        for queued in queue {
            let dispatcher = Arc::clone(&self.dispatcher);
            let token = token.clone();
            tokio::spawn(async move {
                let result = dispatcher.replay(queued.descriptor, token).await;
                let _ = queued.settle.send(result);
            });
        }
    }

    fn schedule_next(self: &Arc<Self>, st: &mut CoordinatorState) -> Option<Teardown> {
        cancel_timer(st);
        if st.disposed {
            return None;
        }
        if !self.store.has_valid_session() {
            debug!("no valid session, proactive refresh off");
            st.active = false;
            return None;
        }
        // A lapsed access token is as due as one inside the buffer.
        let left = self.store.time_until_access_expiry().unwrap_or(Duration::ZERO);
        match plan_proactive(Some(left), st.config.buffer_time) {
            ProactivePlan::Unscheduled => {
                st.active = false;
                None
            }
            ProactivePlan::Immediate => {
                st.active = true;
                self.fire_proactive(st)
            }
            ProactivePlan::After(delay) => {
                st.active = true;
                self.arm(st, delay);
                None
            }
        }
    }

    fn fire_proactive(self: &Arc<Self>, st: &mut CoordinatorState) -> Option<Teardown> {
        if st.refreshing {
            let retry = st.config.min_refresh_interval;
            self.arm(st, retry);
            return None;
        }
        if self.store.is_idle() {
            info!("session idle past timeout, ending instead of refreshing");
            return Some(self.terminate(st, EndReason::Idle, RefreshError::SessionEnded));
        }
        if let Some(last) = st.last_refresh_at {
            let since = last.elapsed();
            if since < st.config.min_refresh_interval {
                let wait = st.config.min_refresh_interval - since;
                debug!(wait_ms = wait.as_millis() as u64, "refreshed recently, deferring");
                self.arm(st, wait);
                return None;
            }
        }
        self.begin_refresh(st, Trigger::Proactive);
        None
    }

    fn arm(self: &Arc<Self>, st: &mut CoordinatorState, delay: Duration) {
        cancel_timer(st);
        st.timer_generation += 1;
        let generation = st.timer_generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
            if let Some(this) = weak.upgrade() {
                this.on_timer(generation);
            }
        });
        st.timer =
            Some(ScheduledTimer { handle: handle.abort_handle(), fires_at: Instant::now() + delay, generation });
        debug!(delay_ms = delay.as_millis() as u64, "proactive refresh armed");
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let teardown = {
            let mut st = self.state.lock();
            if st.disposed || st.timer.as_ref().map(|t| t.generation) != Some(generation) {
                return;
            }
            st.timer = None;
            self.fire_proactive(&mut st)
        };
        self.finish(teardown);
    }

    fn terminate(&self, st: &mut CoordinatorState, reason: EndReason, cause: RefreshError) -> Teardown {
        cancel_timer(st);
        st.active = false;
        st.attempt_count = 0;
        st.session_epoch += 1;
        // A refresh still in flight settles into a dead epoch; the next
        // session must be free to start its own.
        st.refreshing = false;
        let had_session = !self.store.is_empty();
        self.store.clear();
        Teardown {
            reason,
            announce: had_session && reason != EndReason::SiblingLogout,
            cause,
            queue: st.queue.drain(..).collect(),
            joiners: std::mem::take(&mut st.joiners),
        }
    }

    fn finish(&self, teardown: Option<Teardown>) {
        let Some(t) = teardown else { return };
        info!(reason = t.reason.as_str(), rejected = t.queue.len(), "session ended");
        if t.announce {
            self.bus.publish(AuthEventKind::LoggedOut);
        }
        reject_all(t.queue, t.joiners, t.cause);
        redirect_to_login(&*self.navigator, &self.settings.login_path);
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn phase_of(st: &CoordinatorState) -> Phase {
    if st.disposed {
        Phase::Disposed
    } else if st.refreshing {
        Phase::Refreshing
    } else if st.timer.is_some() {
        Phase::Scheduled
    } else {
        Phase::Idle
    }
}

fn cancel_timer(st: &mut CoordinatorState) {
    if let Some(timer) = st.timer.take() {
        timer.handle.abort();
    }
}

fn reject_all(queue: Vec<QueuedRequest>, joiners: Vec<Joiner>, cause: RefreshError) {
    for queued in queue {
        let _ = queued.settle.send(Err(ApiError::from(cause.clone())));
    }
    for joiner in joiners {
        let _ = joiner.send(Err(cause.clone()));
    }
}
