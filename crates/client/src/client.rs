// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root: wires store, bus, navigator, transport, coordinator and
//! pipeline together, and owns login/logout.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError};
use crate::events::{AuthEventKind, ContextChannel, ContextSubscription, EventBus, NoopBus};
use crate::navigate::{HeadlessNavigator, Navigator};
use crate::pipeline::{network_error, status_error, ApiClient, Dispatcher};
use crate::refresh::{
    EndReason, Phase, QueueStatus, RefreshConfigUpdate, RefreshCoordinator, RefreshStatus,
};
use crate::request::{ApiResponse, PreparedRequest, RequestDescriptor};
use crate::retry::RetryDescriptor;
use crate::token::medium::MemoryMedium;
use crate::token::{SessionStore, TokenStore, User};
use crate::transport::{HttpTransport, Transport};

pub const TOKEN_PATH: &str = "/auth/token/";
pub const REFRESH_PATH: &str = "/auth/token/refresh/";
pub const LOGOUT_PATH: &str = "/auth/logout/";

#[derive(Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
    user: User,
}

pub struct SessionClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn TokenStore>>,
    bus: Option<Arc<dyn EventBus>>,
    subscription: Option<ContextSubscription>,
    navigator: Option<Arc<dyn Navigator>>,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, store: None, bus: None, subscription: None, navigator: None, transport: None }
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish and listen on a shared hub.
    pub fn channel(mut self, channel: ContextChannel) -> Self {
        self.subscription = Some(channel.subscribe());
        self.bus = Some(Arc::new(channel));
        self
    }

    /// Publish-only bus.
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Must be called inside a tokio runtime: the coordinator arms its
    /// timer from the stored session right away.
    pub fn build(self) -> anyhow::Result<SessionClient> {
        self.config.validate()?;
        let config = self.config;
        let store = self.store.unwrap_or_else(|| {
            Arc::new(SessionStore::with_settings(MemoryMedium::default(), config.store_settings()))
        });
        let bus = self.bus.unwrap_or_else(|| Arc::new(NoopBus));
        let navigator = self.navigator.unwrap_or_else(|| Arc::new(HeadlessNavigator::default()));
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(config.base_url.as_str())),
        };

        let dispatcher =
            Arc::new(Dispatcher::new(Arc::clone(&transport), Arc::clone(&store), config.request_timeout()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            navigator,
            Arc::clone(&transport),
            Arc::clone(&dispatcher),
            config.coordinator_settings(),
            config.refresh_config(),
        );
        if let Some(subscription) = self.subscription {
            coordinator.spawn_sync_listener(subscription);
        }
        coordinator.reset();

        let api = ApiClient::new(dispatcher, Arc::clone(&coordinator), Arc::clone(&store), config.retry_policy());
        Ok(SessionClient { config, store, bus, transport, coordinator, api })
    }
}

/// One context's session: login/logout plus the wrapped API surface.
pub struct SessionClient {
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    bus: Arc<dyn EventBus>,
    transport: Arc<dyn Transport>,
    coordinator: Arc<RefreshCoordinator>,
    api: ApiClient,
}

impl SessionClient {
    pub fn builder(config: ClientConfig) -> SessionClientBuilder {
        SessionClientBuilder::new(config)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn user(&self) -> Option<User> {
        self.store.user()
    }

    pub fn has_valid_session(&self) -> bool {
        self.store.has_valid_session()
    }

    /// Exchange credentials for a session and start proactive refresh.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let descriptor = RequestDescriptor::post(TOKEN_PATH)
            .json(serde_json::json!({ "username": username, "password": password }));
        let response = self.send_direct(descriptor, None).await?;
        let body: LoginResponse = response.json()?;
        self.store
            .set_session(&body.access, &body.refresh, body.user.clone())
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        info!(user = %body.user.username, "logged in");
        self.bus.publish(AuthEventKind::LoggedIn);
        self.coordinator.begin_session();
        Ok(body.user)
    }

    /// Blacklist the refresh token server-side (best effort), then end the
    /// session locally. Calling it again is harmless.
    pub async fn logout(&self) {
        if let Some(refresh) = self.store.refresh_token() {
            let descriptor =
                RequestDescriptor::post(LOGOUT_PATH).json(serde_json::json!({ "refresh": refresh }));
            if let Err(e) = self.send_direct(descriptor, self.store.access_token()).await {
                warn!(err = %e, "server-side logout failed");
            }
        }
        self.coordinator.end_session(EndReason::Logout);
    }

    /// Login and logout bypass 401 interception and retries.
    async fn send_direct(
        &self,
        descriptor: RequestDescriptor,
        credential: Option<String>,
    ) -> Result<ApiResponse, ApiError> {
        let request = PreparedRequest {
            descriptor: Arc::new(descriptor),
            credential,
            retry: RetryDescriptor::default(),
            timeout: self.config.refresh_timeout(),
        };
        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => return Err(network_error(&request.descriptor, e, 1)),
        };
        if !response.is_success() {
            return Err(status_error(&request.descriptor, response, 1));
        }
        Ok(response)
    }

    pub async fn manual_refresh(&self) -> bool {
        self.coordinator.manual_refresh().await
    }

    pub fn status(&self) -> RefreshStatus {
        self.coordinator.status()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.coordinator.queue_status()
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    pub fn configure(&self, update: RefreshConfigUpdate) -> Result<(), ConfigError> {
        self.coordinator.configure(update)
    }

    pub fn reset(&self) {
        self.coordinator.reset();
    }

    pub fn dispose(&self) {
        self.coordinator.dispose();
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
