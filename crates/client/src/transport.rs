// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport seam.
//!
//! The pipeline and the refresh coordinator only ever talk to a
//! [`Transport`]. [`HttpTransport`] is the reqwest implementation; tests
//! substitute [`crate::test_support::FakeTransport`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use reqwest::Client;

use crate::request::{ApiResponse, Method, Part, PreparedRequest, RequestBody};

/// Why a request produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connection error"),
            Self::Other => f.write_str("network error"),
        }
    }
}

/// A request that never got a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + 'a>>;

/// Sends one attempt. Any status is `Ok`; only a missing response is `Err`.
pub trait Transport: Send + Sync + 'static {
    fn send<'a>(&'a self, request: &'a PreparedRequest) -> TransportFuture<'a>;
}

/// reqwest-backed transport against one API base URL.
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        crate::ensure_crypto();
        let client = Client::builder().build().unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self, request: &PreparedRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let desc = &request.descriptor;
        let method = match desc.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut req = self.client.request(method, self.url(&desc.path)).timeout(request.timeout);
        if !desc.query.is_empty() {
            req = req.query(&desc.query);
        }
        for (name, value) in &desc.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(ref token) = request.credential {
            req = req.bearer_auth(token);
        }
        req = match &desc.body {
            RequestBody::Empty => req,
            RequestBody::Json(value) => req.json(value),
            RequestBody::Binary(bytes) => req.body(bytes.clone()),
            RequestBody::Multipart(parts) => req.multipart(multipart_form(parts)?),
        };
        Ok(req)
    }
}

/// Rebuild a multipart form from stored parts. Forms are single-use, so
/// every retry and replay gets a fresh one.
fn multipart_form(parts: &[Part]) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            Part::Text { name, value } => form.text(name.clone(), value.clone()),
            Part::File { name, file_name, mime, bytes } => {
                let mut p = reqwest::multipart::Part::bytes(bytes.to_vec());
                if let Some(file_name) = file_name {
                    p = p.file_name(file_name.clone());
                }
                if let Some(mime) = mime {
                    p = p.mime_str(mime).map_err(|e| {
                        TransportError::new(TransportErrorKind::Other, format!("bad mime: {e}"))
                    })?;
                }
                form.part(name.clone(), p)
            }
        };
    }
    Ok(form)
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a PreparedRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let req = self.build(request)?;
            let resp = req
                .send()
                .await
                .map_err(|e| TransportError::new(classify(&e), e.to_string()))?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
                .collect();
            let body = resp
                .bytes()
                .await
                .map_err(|e| TransportError::new(classify(&e), e.to_string()))?;
            Ok(ApiResponse { status, headers, body })
        })
    }
}
