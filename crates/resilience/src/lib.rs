//! Failure isolation for calls to the remote service
//!
//! `FailureIsolationGate` is a circuit breaker shared by every outbound call.
//! Network failures and 5xx responses count against it; once enough pile up in
//! a row the gate opens and callers fail fast until a cooldown passes. A single
//! probe call then decides whether the service is back.

pub mod error;
pub mod gate;

pub use error::{Error, Result};
pub use gate::{CircuitState, FailureIsolationGate, GateConfig, GateSnapshot, Passage};
