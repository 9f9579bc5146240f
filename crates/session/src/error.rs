//! Error types for session operations

/// Errors from session management.
///
/// Renewal failures never surface here: they end the session and are reported
/// as an absent credential plus a `CredentialRenewalFailed` event.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid renewal policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Credentials(#[from] credentials::Error),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
