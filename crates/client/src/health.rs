//! Service health report

use resilience::{CircuitState, GateSnapshot};
use serde::Serialize;
use session::SessionStatus;

/// Overall reachability of the remote service, derived from the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub circuit: GateSnapshot,
    pub session: SessionStatus,
}

impl ServiceHealth {
    pub fn new(circuit: GateSnapshot, session: SessionStatus) -> Self {
        Self {
            status: circuit.state.into(),
            circuit,
            session,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status != HealthStatus::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_out() -> SessionStatus {
        SessionStatus {
            authenticated: false,
            subject: None,
            role: None,
            access_expires_in_secs: None,
            refresh_expires_in_secs: None,
        }
    }

    #[test]
    fn status_follows_circuit() {
        assert_eq!(HealthStatus::from(CircuitState::Closed), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(CircuitState::HalfOpen), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(CircuitState::Open), HealthStatus::Unavailable);
    }

    #[test]
    fn serializes_nested_report() {
        let health = ServiceHealth::new(
            GateSnapshot {
                state: CircuitState::Open,
                failures: 5,
                retry_in_secs: Some(12),
            },
            signed_out(),
        );
        assert!(!health.is_available());

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["circuit"]["state"], "open");
        assert_eq!(json["circuit"]["retry_in_secs"], 12);
        assert_eq!(json["session"]["authenticated"], false);
    }
}
