//! Error types for credential operations

use crate::credential::CredentialKind;

/// Errors from credential parsing, storage, and token endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} credential has expired")]
    CredentialExpired(CredentialKind),

    #[error("malformed credential: {0}")]
    Malformed(String),

    /// The refresh endpoint refused the refresh credential (revoked, rotated
    /// elsewhere, or otherwise invalid).
    #[error("refresh credential rejected: {0}")]
    RenewalRejected(String),

    #[error("sign-in rejected: {0}")]
    SignInRejected(String),

    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("session storage error: {0}")]
    Storage(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
