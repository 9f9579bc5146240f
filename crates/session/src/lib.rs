//! Credential lifecycle for a single authenticated session
//!
//! `CredentialLifecycleManager` decides whether the cached access credential
//! is still good enough to use, renews it through the remote refresh endpoint
//! when it is not, and makes sure that however many callers notice staleness
//! at once, only one refresh call goes out.
//!
//! Session lifecycle:
//! 1. `sign_in()` stores the first credential pair
//! 2. `get_usable_credential()` hands out the access credential, renewing it
//!    once less than the safety margin remains
//! 3. The background task from `spawn_renewal_task()` renews ahead of time
//!    once the access credential enters the renewal window
//! 4. A failed renewal clears the store; the session is over until the next
//!    sign-in
//! 5. `sign_out()` clears the store explicitly

pub mod error;
pub mod manager;
pub mod renewal;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use manager::{CredentialLifecycleManager, RenewalPolicy, SessionStatus};
pub use renewal::spawn_renewal_task;
