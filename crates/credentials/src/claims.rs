//! JWT claim decoding
//!
//! Credentials are treated as opaque signed tokens: the signature is the
//! remote service's concern. The client only reads the payload segment to learn
//! when the token expires and whom it identifies.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Claims the client cares about. `exp` is required; everything else is
/// optional so tokens from different issuers still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    #[serde(default, alias = "userId", alias = "user_id")]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Expiry as unix seconds
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
}

impl Claims {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.exp
    }

    /// Seconds left before expiry, zero once expired.
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }
}

/// Decode the payload segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::Malformed(
            "expected three dot-separated segments".into(),
        ));
    };

    if header.is_empty() || payload.is_empty() {
        return Err(Error::Malformed("empty token segment".into()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Malformed(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Malformed(format!("payload is not a claims object: {e}")))
}
