//! Shared building blocks for the session gateway crates
//!
//! Holds the pieces every layer needs: secret wrapping for bearer tokens, the
//! configuration error type, an injectable clock, and the lifecycle event bus
//! that couples the credential and failure-isolation layers to their observers.

mod clock;
mod error;
mod events;
mod secret;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{Error, Result};
pub use events::{EventBus, LifecycleEvent};
pub use secret::Secret;
