//! Service-specific error types

use thiserror::Error;
use transport::ClassifiedError;

/// Session gateway startup errors.
///
/// Per-request failures are turned into JSON error responses by the proxy
/// handler; they never propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("startup sign-in rejected: check gateway.username and the configured password")]
    SignInRejected,

    #[error("startup sign-in failed: {0}")]
    SignInFailed(ClassifiedError),
}

impl Error {
    /// Whether retrying later could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SignInRejected => false,
            Error::SignInFailed(e) => e.counts_against_circuit() || *e == ClassifiedError::ServiceUnavailable,
        }
    }
}

impl From<ClassifiedError> for Error {
    fn from(error: ClassifiedError) -> Self {
        match error {
            ClassifiedError::Unauthorized | ClassifiedError::Forbidden => Error::SignInRejected,
            other => Error::SignInFailed(other),
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
