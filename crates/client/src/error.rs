//! Error types for pipeline construction

/// Errors raised while assembling a `RequestPipeline`. Request-time failures
/// are `transport::ClassifiedError` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Credentials(#[from] credentials::Error),

    #[error(transparent)]
    Session(#[from] session::Error),

    #[error(transparent)]
    Gate(#[from] resilience::Error),
}

/// Result alias for pipeline construction.
pub type Result<T> = std::result::Result<T, Error>;
