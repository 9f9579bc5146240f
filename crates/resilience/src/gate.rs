//! Circuit breaker state machine
//!
//! ```text
//!            failures >= threshold
//!   Closed ───────────────────────▶ Open
//!     ▲                               │ cooldown elapsed,
//!     │ probe succeeds                │ first can_attempt()
//!     │                               ▼
//!     └──────────────────────────── HalfOpen ── probe fails ──▶ Open
//! ```
//!
//! All transitions happen under one `std::sync::Mutex` that is never held
//! across an await. Time comes from the injected `Clock`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use common::{Clock, EventBus, LifecycleEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the circuit stays open before a probe is allowed.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.cooldown.is_zero() {
            return Err(Error::InvalidConfig("cooldown must be non-zero".into()));
        }
        Ok(())
    }
}

/// How a call got through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passage {
    /// The circuit is closed.
    Closed,
    /// This call holds the single half-open probe; its outcome decides the
    /// next state.
    Probe,
}

/// Point-in-time view of the gate, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Whole seconds until a probe is allowed; only set while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_secs: Option<u64>,
}

#[derive(Debug)]
struct GateState {
    state: CircuitState,
    failures: u32,
    next_attempt_at: Option<Instant>,
    probe_claimed: bool,
}

/// Shared circuit breaker. One per remote service, held in an `Arc`.
pub struct FailureIsolationGate {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    inner: Mutex<GateState>,
}

impl FailureIsolationGate {
    pub fn new(config: GateConfig, clock: Arc<dyn Clock>, events: EventBus) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            events,
            inner: Mutex::new(GateState {
                state: CircuitState::Closed,
                failures: 0,
                next_attempt_at: None,
                probe_claimed: false,
            }),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether a call may go out now.
    pub fn can_attempt(&self) -> bool {
        self.try_acquire().is_some()
    }

    /// Claim passage for one call, or `None` to fail fast.
    ///
    /// The first caller after the cooldown moves the gate to half-open and
    /// claims the only probe; everyone else keeps failing fast until the probe
    /// reports back. Decided under one lock, so a caller knows whether the
    /// probe is its own.
    pub fn try_acquire(&self) -> Option<Passage> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Passage::Closed),
            CircuitState::Open => {
                let due = inner.next_attempt_at.is_none_or(|at| now >= at);
                if !due {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_claimed = true;
                drop(inner);
                info!("circuit half-open, allowing probe");
                record_transition(CircuitState::HalfOpen);
                Some(Passage::Probe)
            }
            CircuitState::HalfOpen => {
                if inner.probe_claimed {
                    None
                } else {
                    inner.probe_claimed = true;
                    Some(Passage::Probe)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.next_attempt_at = None;
        inner.probe_claimed = false;
        drop(inner);

        if previous != CircuitState::Closed {
            info!(from = previous.label(), "circuit closed");
            record_transition(CircuitState::Closed);
        }
    }

    /// Count a success seen on the side of an admitted call, such as a
    /// credential renewal. Resets the failure count while closed; an open or
    /// half-open circuit is left for the probe to settle.
    pub fn record_side_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            inner.failures = 0;
        }
    }

    /// Count a failure. Returns `true` if the circuit is still letting calls
    /// through afterwards.
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);

        let trip = match inner.state {
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if !trip {
            let open = inner.state == CircuitState::Open;
            debug!(failures = inner.failures, state = inner.state.label(), "failure recorded");
            return !open;
        }

        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.next_attempt_at = Some(now + self.config.cooldown);
        inner.probe_claimed = false;
        let failures = inner.failures;
        drop(inner);

        warn!(
            from = from.label(),
            failures,
            cooldown_secs = self.config.cooldown.as_secs(),
            "circuit opened"
        );
        record_transition(CircuitState::Open);
        self.events.publish(LifecycleEvent::ServiceUnavailable {
            retry_in: self.config.cooldown,
        });
        false
    }

    /// Hand back a claimed half-open probe whose call ended without an outcome
    /// the gate records (a 4xx, or no dispatch at all). The next caller probes
    /// instead. No effect in any other state.
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_claimed {
            inner.probe_claimed = false;
            debug!("half-open probe released without outcome");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        let retry_in_secs = match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(at)) => Some(ceil_secs(at.saturating_duration_since(now))),
            _ => None,
        };
        GateSnapshot {
            state: inner.state,
            failures: inner.failures,
            retry_in_secs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // State stays consistent across a panic in another holder: every
        // update is a handful of plain field writes.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn record_transition(to: CircuitState) {
    metrics::counter!("gate_transitions_total", "to" => to.label()).increment(1);
}
