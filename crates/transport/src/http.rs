//! reqwest-backed transport
//!
//! Resolves request paths against a base URL, forwards method, headers, and
//! body, and maps reqwest failures onto `TransportError`. Non-2xx responses are
//! read in full so the status body can be logged by callers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};

/// HTTP transport for a single remote API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

impl HttpTransport {
    /// `default_timeout` applies when a request carries no timeout of its own.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_timeout,
        }
    }

    /// Join the base URL and a request path without doubling slashes.
    fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let url = self.url_for(&request.path);

        let response = self
            .client
            .request(request.method, &url)
            .headers(request.headers)
            .timeout(timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "remote returned non-success status");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send(&self, request: ApiRequest) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(self.dispatch(request))
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Network(error.to_string())
    }
}
