// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structural JWT checks. Signatures are the backend's business; the client
//! only needs the `exp` claim.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::TokenError;

#[derive(Deserialize)]
struct Claims {
    exp: Option<serde_json::Number>,
}

/// Decode the `exp` claim (epoch seconds) without checking it.
pub fn decode_expiry(token: &str) -> Result<u64, TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::Malformed("expected three segments".into()));
    };
    if header.is_empty() || payload.is_empty() {
        return Err(TokenError::Malformed("empty segment".into()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Malformed(format!("payload encoding: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("payload json: {e}")))?;
    let exp = claims.exp.ok_or_else(|| TokenError::Malformed("missing exp claim".into()))?;
    exp.as_u64()
        .or_else(|| exp.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
        .ok_or_else(|| TokenError::Malformed("exp is not a timestamp".into()))
}

/// Decode `exp` and reject tokens already expired at `now` (epoch seconds).
pub fn validate(token: &str, now: u64) -> Result<u64, TokenError> {
    let exp = decode_expiry(token)?;
    if exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(exp)
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
