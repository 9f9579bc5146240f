//! Authenticated, failure-isolated access to the remote API
//!
//! `RequestPipeline` is what calling code talks to. Every outbound call goes
//! through the same steps:
//! 1. Fail fast with `ServiceUnavailable` while the circuit is open
//! 2. Attach a usable access credential, renewing first if it is due
//! 3. Dispatch through the transport under a timeout
//! 4. Report the outcome to the circuit breaker and, on a 401, end the session
//!
//! Callers only ever see `ClassifiedError`, never raw transport failures.

pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;

pub use config::{ClientConfig, StorageConfig};
pub use error::{Error, Result};
pub use health::{HealthStatus, ServiceHealth};
pub use pipeline::RequestPipeline;
