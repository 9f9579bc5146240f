//! Error types for gate construction

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid gate configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
