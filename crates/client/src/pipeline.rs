// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request pipeline: credential attachment, transient retries, and 401
//! interception in front of the transport.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::refresh::{EndReason, RefreshCoordinator};
use crate::request::{ApiResponse, Method, Part, PreparedRequest, RequestBody, RequestDescriptor};
use crate::retry::{Failure, RetryDescriptor, RetryPolicy};
use crate::token::TokenStore;
use crate::transport::{Transport, TransportError};

/// Outcome of a single attempt on the wire.
pub(crate) enum Attempt {
    Success(ApiResponse),
    Rejected(ApiResponse),
    NoResponse(TransportError),
}

/// Sends single attempts. Shared by the pipeline and the coordinator's
/// post-refresh replays.
pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        request_timeout: Duration,
    ) -> Self {
        Self { transport, store, request_timeout }
    }

    pub(crate) async fn attempt(
        &self,
        descriptor: &Arc<RequestDescriptor>,
        credential: Option<String>,
        retry: RetryDescriptor,
    ) -> Attempt {
        let request = PreparedRequest {
            descriptor: Arc::clone(descriptor),
            credential,
            retry,
            timeout: self.request_timeout,
        };
        debug!(
            method = %descriptor.method,
            path = %descriptor.path,
            retry = retry.retry_count,
            replayed = retry.replayed,
            "sending request"
        );
        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => {
                self.store.touch_activity();
                Attempt::Success(response)
            }
            Ok(response) => Attempt::Rejected(response),
            Err(e) => Attempt::NoResponse(e),
        }
    }

    /// Re-issue `descriptor` once with a fresh token. Never replayed again.
    pub(crate) async fn replay(
        &self,
        descriptor: Arc<RequestDescriptor>,
        credential: String,
    ) -> Result<ApiResponse, ApiError> {
        match self.attempt(&descriptor, Some(credential), RetryDescriptor::replay()).await {
            Attempt::Success(response) => Ok(response),
            Attempt::Rejected(response) if response.status == 401 => {
                warn!(method = %descriptor.method, path = %descriptor.path, "unauthorized after refresh");
                Err(ApiError::Unauthorized { method: descriptor.method, path: descriptor.path.clone() })
            }
            Attempt::Rejected(response) => Err(status_error(&descriptor, response, 1)),
            Attempt::NoResponse(e) => Err(network_error(&descriptor, e, 1)),
        }
    }
}

pub(crate) fn status_error(descriptor: &RequestDescriptor, response: ApiResponse, attempts: u32) -> ApiError {
    ApiError::Status {
        method: descriptor.method,
        path: descriptor.path.clone(),
        status: response.status,
        attempts,
        body: response.text(),
    }
}

pub(crate) fn network_error(descriptor: &RequestDescriptor, e: TransportError, attempts: u32) -> ApiError {
    ApiError::Network {
        method: descriptor.method,
        path: descriptor.path.clone(),
        attempts,
        kind: e.kind,
        message: e.message,
    }
}

/// Multipart and binary bodies carry no caller content type; the transport
/// sets it (with the boundary).
fn normalize(mut descriptor: RequestDescriptor) -> RequestDescriptor {
    if matches!(descriptor.body, RequestBody::Multipart(_) | RequestBody::Binary(_)) {
        descriptor.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
    }
    descriptor
}

/// Session-aware API client.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<dyn TokenStore>,
    policy: Arc<RetryPolicy>,
}

impl ApiClient {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<dyn TokenStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self { dispatcher, coordinator, store, policy: Arc::new(policy) }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::get(path)).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::new(Method::Put, path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::new(Method::Patch, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::new(Method::Delete, path)).await
    }

    /// Multipart POST.
    pub async fn upload(&self, path: &str, parts: Vec<Part>) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::post(path).body(RequestBody::Multipart(parts))).await
    }

    /// GET and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get(path).await?.json()
    }

    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, ApiError> {
        let descriptor = Arc::new(normalize(descriptor));
        if self.store.is_idle() {
            warn!(path = %descriptor.path, "session idle, refusing request");
            self.coordinator.end_session(EndReason::Idle);
            return Err(ApiError::SessionExpired);
        }

        let mut retry = RetryDescriptor::default();
        loop {
            let credential = self.store.access_token();
            let failure = match self.dispatcher.attempt(&descriptor, credential.clone(), retry).await {
                Attempt::Success(response) => return Ok(response),
                Attempt::Rejected(response)
                    if response.status == 401
                        && !descriptor.targets(&self.policy.refresh_path)
                        && !retry.replayed =>
                {
                    debug!(path = %descriptor.path, "401, handing to refresh coordinator");
                    return self.coordinator.replay_after_refresh(descriptor, credential).await;
                }
                Attempt::Rejected(response) => {
                    if !self.policy.is_retryable(&descriptor, &retry, Failure::Status(response.status)) {
                        return Err(status_error(&descriptor, response, retry.retry_count + 1));
                    }
                    format!("status {}", response.status)
                }
                Attempt::NoResponse(e) => {
                    if !self.policy.is_retryable(&descriptor, &retry, Failure::NoResponse) {
                        return Err(network_error(&descriptor, e, retry.retry_count + 1));
                    }
                    e.to_string()
                }
            };
            retry.retry_count += 1;
            let delay = self.policy.backoff_delay(retry.retry_count);
            warn!(
                method = %descriptor.method,
                path = %descriptor.path,
                attempt = retry.retry_count,
                delay_ms = delay.as_millis() as u64,
                err = %failure,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
