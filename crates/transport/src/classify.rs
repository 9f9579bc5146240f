//! Normalization of transport failures into a finite error set
//!
//! Upper layers only need the category of a failure: whether the session was
//! rejected, the request was wrong, or the service is unreachable. Only the
//! last family (network failures and 5xx) counts against the circuit breaker;
//! a 4xx proves the service is up and rejecting one specific request.

use crate::TransportError;

/// Category of a failed call, as surfaced to callers of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifiedError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    /// Any other 4xx (400, 422, 429, ...).
    #[error("request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("server error (status {status})")]
    ServerError { status: u16 },

    /// Connection failure or timeout.
    #[error("network unavailable: {reason}")]
    NetworkUnavailable { reason: String },

    /// The circuit is open; no I/O was attempted.
    #[error("service unavailable")]
    ServiceUnavailable,
}

impl ClassifiedError {
    /// Stable label for logs, metrics, and error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedError::Unauthorized => "unauthorized",
            ClassifiedError::Forbidden => "forbidden",
            ClassifiedError::NotFound => "not-found",
            ClassifiedError::Conflict => "conflict",
            ClassifiedError::Rejected { .. } => "rejected",
            ClassifiedError::ServerError { .. } => "server-error",
            ClassifiedError::NetworkUnavailable { .. } => "network-unavailable",
            ClassifiedError::ServiceUnavailable => "service-unavailable",
        }
    }

    /// Whether this failure should be recorded by the circuit breaker.
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            ClassifiedError::ServerError { .. } | ClassifiedError::NetworkUnavailable { .. }
        )
    }

    /// HTTP status to report to a downstream caller.
    ///
    /// 4xx categories keep their status; upstream 5xx and network failures
    /// become 502, an open circuit becomes 503.
    pub fn http_status(&self) -> u16 {
        match self {
            ClassifiedError::Unauthorized => 401,
            ClassifiedError::Forbidden => 403,
            ClassifiedError::NotFound => 404,
            ClassifiedError::Conflict => 409,
            ClassifiedError::Rejected { status } => *status,
            ClassifiedError::ServerError { .. } | ClassifiedError::NetworkUnavailable { .. } => 502,
            ClassifiedError::ServiceUnavailable => 503,
        }
    }
}

/// Classify a non-success HTTP status.
///
/// 401/403/404/409 map to their own categories, any other 4xx is `Rejected`,
/// and everything else (5xx, or a stray 1xx/3xx) is `ServerError`.
pub fn classify_status(status: u16) -> ClassifiedError {
    match status {
        401 => ClassifiedError::Unauthorized,
        403 => ClassifiedError::Forbidden,
        404 => ClassifiedError::NotFound,
        409 => ClassifiedError::Conflict,
        400..=499 => ClassifiedError::Rejected { status },
        _ => ClassifiedError::ServerError { status },
    }
}

/// Classify a raw transport failure.
pub fn classify(error: &TransportError) -> ClassifiedError {
    match error {
        TransportError::Network(reason) => ClassifiedError::NetworkUnavailable {
            reason: reason.clone(),
        },
        TransportError::Timeout(after) => ClassifiedError::NetworkUnavailable {
            reason: format!("timed out after {}ms", after.as_millis()),
        },
        TransportError::Status { status, .. } => classify_status(*status),
    }
}
