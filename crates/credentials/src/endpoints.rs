//! Sign-in and refresh endpoint calls
//!
//! Both endpoints answer with a fresh credential pair. They go out through the
//! same `Transport` as ordinary requests but are tagged with their `CallKind`,
//! so they never carry a bearer credential and a 401 from them is reported as a
//! rejection rather than treated as a lost session.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use transport::{ApiRequest, ApiResponse, CallKind, Transport, TransportError};

use crate::credential::{Credential, CredentialPair};
use crate::error::{Error, Result};

/// Paths of the two token endpoints, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEndpoints {
    pub sign_in_path: String,
    pub refresh_path: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            sign_in_path: "/auth/login".into(),
            refresh_path: "/auth/refresh".into(),
        }
    }
}

/// Body returned by both endpoints.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
}

impl TokenResponse {
    pub fn into_pair(self) -> Result<CredentialPair> {
        CredentialPair::parse(self.access_token, self.refresh_token)
    }
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct SignInBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// Exchange the refresh credential for a new pair.
///
/// Any 4xx means the refresh credential is no longer honored and comes back as
/// `RenewalRejected`. Network failures, timeouts and 5xx stay `Transport` errors
/// so the caller can count them against the remote service.
pub async fn refresh_credentials(
    transport: &dyn Transport,
    endpoints: &AuthEndpoints,
    refresh: &Credential,
    timeout: Duration,
) -> Result<CredentialPair> {
    let body = RefreshBody {
        refresh_token: refresh.token().expose(),
    };
    let request = ApiRequest::post_json(&endpoints.refresh_path, &body)
        .map_err(|e| Error::Malformed(format!("encoding refresh body: {e}")))?
        .with_kind(CallKind::Refresh)
        .with_timeout(timeout);

    match call(transport, request, timeout).await {
        Ok(response) => {
            debug!(path = %endpoints.refresh_path, "refresh endpoint returned new pair");
            decode_pair(&response)
        }
        Err(TransportError::Status { status, body }) if (400..500).contains(&status) => {
            warn!(status, "refresh credential rejected");
            Err(Error::RenewalRejected(format!("status {status}: {body}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Exchange a username and password for the first pair of a session.
pub async fn sign_in(
    transport: &dyn Transport,
    endpoints: &AuthEndpoints,
    username: &str,
    password: &Secret<String>,
    timeout: Duration,
) -> Result<CredentialPair> {
    let body = SignInBody {
        username,
        password: password.expose(),
    };
    let request = ApiRequest::post_json(&endpoints.sign_in_path, &body)
        .map_err(|e| Error::Malformed(format!("encoding sign-in body: {e}")))?
        .with_kind(CallKind::SignIn)
        .with_timeout(timeout);

    match call(transport, request, timeout).await {
        Ok(response) => {
            debug!(username, "sign-in succeeded");
            decode_pair(&response)
        }
        Err(TransportError::Status { status, body }) if (400..500).contains(&status) => {
            warn!(username, status, "sign-in rejected");
            Err(Error::SignInRejected(format!("status {status}: {body}")))
        }
        Err(e) => Err(e.into()),
    }
}

async fn call(
    transport: &dyn Transport,
    request: ApiRequest,
    timeout: Duration,
) -> std::result::Result<ApiResponse, TransportError> {
    tokio::time::timeout(timeout, transport.send(request))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

fn decode_pair(response: &ApiResponse) -> Result<CredentialPair> {
    response
        .json::<TokenResponse>()
        .map_err(|e| Error::Malformed(format!("invalid token response: {e}")))?
        .into_pair()
}
