//! Transport abstraction for outbound API calls
//!
//! Defines the `Transport` trait that decouples the request pipeline from the
//! HTTP stack. `HttpTransport` is the reqwest-backed implementation; tests plug
//! in scripted transports. Failures come back as `TransportError` and are
//! normalized by `classify` into the finite `ClassifiedError` set that upper
//! layers act on.

pub mod classify;
pub mod http;

pub use classify::{ClassifiedError, classify, classify_status};
pub use http::HttpTransport;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// What an outbound call is for. Sign-in and refresh calls carry no bearer
/// credential and a 401 on them never clears the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Standard,
    SignIn,
    Refresh,
}

/// Outbound request as seen by the pipeline and transports.
///
/// `path` includes the query string and is resolved against the transport's
/// base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub requires_auth: bool,
    pub kind: CallKind,
    /// Per-request timeout; the pipeline fills in its default when `None`.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// A standard call that requires authorization.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            requires_auth: true,
            kind: CallKind::Standard,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST with a JSON-serialized body and `content-type: application/json`.
    pub fn post_json<T: Serialize>(path: impl Into<String>, body: &T) -> serde_json::Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        let mut request = Self::new(Method::POST, path).with_body(bytes);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mark the call as not needing a bearer credential.
    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Sign-in and refresh calls never carry a bearer credential.
    pub fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        if kind != CallKind::Standard {
            self.requires_auth = false;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach `Authorization: Bearer <token>`, replacing any existing value.
    /// The header is marked sensitive so it is not printed by `Debug`.
    pub fn set_bearer(&mut self, token: &str) -> std::result::Result<(), reqwest::header::InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Raw failure from a transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, unreadable body.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote answered with a non-success status.
    #[error("remote returned status {status}")]
    Status { status: u16, body: String },
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Anything that can dispatch an `ApiRequest`.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Dispatch the request. Non-2xx responses come back as
    /// `TransportError::Status`; the transport does not retry.
    fn send(&self, request: ApiRequest) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>>;
}
