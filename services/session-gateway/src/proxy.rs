//! HTTP forwarding through the request pipeline
//!
//! Receives inbound requests, strips hop-by-hop headers and any caller
//! credentials, and sends the request through the pipeline, which attaches the
//! session's bearer credential and applies the circuit breaker. Classified
//! failures become JSON error bodies.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use client::RequestPipeline;
use tracing::{error, instrument, warn};
use transport::{ApiRequest, ApiResponse, ClassifiedError};

use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Caller headers that the gateway owns: the bearer comes from the session,
/// host and length are recomputed for the remote.
const GATEWAY_OWNED_HEADERS: &[&str] = &["authorization", "cookie", "host", "content-length"];

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, error_type: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Serialize `body` as a JSON response.
pub fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response {
    match serde_json::to_string(body) {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Map a pipeline failure onto the downstream status and error body.
///
/// An open circuit carries `Retry-After` when the gate knows its cooldown.
pub fn classified_response(error: &ClassifiedError, retry_in_secs: Option<u64>, request_id: &str) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = error_response(status, error.label(), &error.to_string(), request_id);
    if *error == ClassifiedError::ServiceUnavailable
        && let Some(secs) = retry_in_secs
    {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Forward an inbound request to the remote API through the pipeline.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    pipeline: &RequestPipeline,
    request: Request<Body>,
    max_body_bytes: usize,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && !is_gateway_owned(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    let body = match axum::body::to_bytes(request.into_body(), max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            metrics::record_error("invalid-request");
            metrics::record_request(400, method.as_str(), started.elapsed().as_secs_f64());
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid-request",
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    let mut api_request = ApiRequest::new(method.clone(), path).with_body(body);
    api_request.headers = headers;

    let response = match pipeline.execute(api_request).await {
        Ok(upstream) => into_response(upstream, &request_id),
        Err(e) => {
            metrics::record_error(e.label());
            let retry_in_secs = pipeline.gate().snapshot().retry_in_secs;
            classified_response(&e, retry_in_secs, &request_id)
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Return the remote's response verbatim, minus hop-by-hop headers.
fn into_response(upstream: ApiResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response.body(Body::from(upstream.body)).unwrap_or_else(|e| {
        error!(error = %e, "failed to build response from upstream");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "gateway-error",
            &format!("response build error: {e}"),
            request_id,
        )
    })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_gateway_owned(name: &str) -> bool {
    GATEWAY_OWNED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
