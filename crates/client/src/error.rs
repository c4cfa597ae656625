// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::request::Method;
use crate::transport::TransportErrorKind;

/// Structural or expiry problems with a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed(String),
    Expired,
}

impl TokenError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "TOKEN_MALFORMED",
            Self::Expired => "TOKEN_EXPIRED",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed token: {reason}"),
            Self::Expired => f.write_str("token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Outcome of a failed refresh call.
///
/// Cloned to every caller queued or joined behind the in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token stored.
    NoRefreshToken,
    /// The refresh endpoint refused the refresh token (401/403).
    Rejected { status: u16 },
    /// The refresh endpoint answered 2xx with an unusable body.
    Malformed(String),
    /// No response from the refresh endpoint.
    Network { kind: TransportErrorKind, message: String },
    /// Any other non-success status from the refresh endpoint.
    Status { status: u16 },
    /// The session was ended or the coordinator disposed while waiting.
    SessionEnded,
}

impl RefreshError {
    /// Unrecoverable failures purge the session and send the user to login.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::NoRefreshToken | Self::Rejected { .. } | Self::Malformed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => "NO_REFRESH_TOKEN",
            Self::Rejected { .. } => "REFRESH_REJECTED",
            Self::Malformed(_) => "REFRESH_MALFORMED",
            Self::Network { .. } => "REFRESH_NETWORK",
            Self::Status { .. } => "REFRESH_STATUS",
            Self::SessionEnded => "SESSION_ENDED",
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRefreshToken => f.write_str("no refresh token available"),
            Self::Rejected { status } => write!(f, "refresh token rejected ({status})"),
            Self::Malformed(reason) => write!(f, "malformed refresh response: {reason}"),
            Self::Network { kind, message } => write!(f, "refresh {kind}: {message}"),
            Self::Status { status } => write!(f, "refresh failed ({status})"),
            Self::SessionEnded => f.write_str("session ended while waiting for refresh"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Error surfaced to callers of the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response after exhausting retries.
    Network {
        method: Method,
        path: String,
        attempts: u32,
        kind: TransportErrorKind,
        message: String,
    },
    /// Non-success response that was not (or no longer) retryable.
    Status { method: Method, path: String, status: u16, attempts: u32, body: String },
    /// A 401 on the replay that followed a refresh.
    Unauthorized { method: Method, path: String },
    /// The refresh this request was waiting on failed.
    Refresh(RefreshError),
    /// The session went idle past the idle timeout.
    SessionExpired,
    /// Logout or teardown rejected the request.
    SessionEnded,
    /// Response body did not decode.
    Decode(String),
}

impl ApiError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK",
            Self::Status { .. } => "STATUS",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Refresh(_) => "REFRESH_FAILED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::Decode(_) => "DECODE",
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    /// Failures the user must re-authenticate to get past.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Unauthorized { .. } | Self::SessionExpired | Self::SessionEnded => true,
            Self::Refresh(e) => e.is_unrecoverable(),
            _ => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { method, path, attempts, kind, message } => {
                write!(f, "{method} {path}: {kind} after {attempts} attempt(s): {message}")
            }
            Self::Status { method, path, status, attempts, body } => {
                write!(f, "{method} {path}: status {status} after {attempts} attempt(s)")?;
                if !body.is_empty() {
                    write!(f, ": {body}")?;
                }
                Ok(())
            }
            Self::Unauthorized { method, path } => {
                write!(f, "{method} {path}: unauthorized after token refresh")
            }
            Self::Refresh(e) => write!(f, "token refresh failed: {e}"),
            Self::SessionExpired => f.write_str("session expired after inactivity"),
            Self::SessionEnded => f.write_str("session ended"),
            Self::Decode(reason) => write!(f, "failed to decode response: {reason}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::SessionEnded => Self::SessionEnded,
            other => Self::Refresh(other),
        }
    }
}

/// Rejected configuration value. The previous configuration stays in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
