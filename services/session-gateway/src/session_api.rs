//! Session endpoints
//!
//! Lets an operator (or a sidecar) manage the gateway's single session:
//! - POST   /session  {"username","password"}  sign in, returns session status
//! - GET    /session                           current session status
//! - DELETE /session                           sign out
//!
//! Responses never include tokens.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::Secret;
use serde::Deserialize;
use tracing::{error, info};

use crate::AppState;
use crate::proxy::{classified_response, error_response, json_response};

#[derive(Deserialize)]
struct SignInRequest {
    username: String,
    password: String,
}

/// POST /session: exchange a username and password for a credential pair.
pub async fn sign_in(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = crate::new_request_id();
    let request: SignInRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid-request",
                &format!("expected {{\"username\",\"password\"}}: {e}"),
                &request_id,
            );
        }
    };
    let password = Secret::new(request.password);

    match state.pipeline.sign_in(&request.username, &password).await {
        Ok(status) => {
            info!(request_id, username = %request.username, "session established");
            json_response(StatusCode::OK, &status)
        }
        Err(e) => {
            let retry_in_secs = state.pipeline.gate().snapshot().retry_in_secs;
            classified_response(&e, retry_in_secs, &request_id)
        }
    }
}

/// GET /session: report whether a session exists and when it expires.
pub async fn status(State(state): State<AppState>) -> Response {
    let status = state.pipeline.manager().session_status().await;
    json_response(StatusCode::OK, &status)
}

/// DELETE /session: forget the stored credentials. Idempotent.
pub async fn sign_out(State(state): State<AppState>) -> Response {
    match state.pipeline.sign_out().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            let request_id = crate::new_request_id();
            error!(request_id, error = %e, "failed to clear session storage");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage-error",
                &e.to_string(),
                &request_id,
            )
        }
    }
}
