//! Proactive background renewal
//!
//! Spawns a periodic task that renews the credential pair once the access
//! credential enters the renewal window, so request-time renewal is the
//! exception rather than the rule. The task goes through the same
//! single-flight path as request-time renewal.

use std::sync::Arc;
use std::time::Duration;

use credentials::CredentialKind;
use resilience::CircuitState;
use tracing::{debug, info};

use crate::manager::CredentialLifecycleManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// No session, or the access credential is not due yet
    Idle,
    /// The circuit is open or probing; leave it to the half-open probe
    GateNotClosed,
    Renewed,
    Failed,
}

/// Spawn a background task that checks the session every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_renewal_task(
    manager: Arc<CredentialLifecycleManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "background renewal started");

        loop {
            ticker.tick().await;
            renewal_cycle(&manager).await;
        }
    })
}

async fn renewal_cycle(manager: &CredentialLifecycleManager) -> CycleOutcome {
    // A missing refresh credential is not this task's business: without a
    // session there is nothing to renew, and clearing is left to callers.
    if manager.store().read(CredentialKind::Refresh).await.is_none() {
        return CycleOutcome::Idle;
    }
    if !manager.needs_proactive_renewal().await {
        return CycleOutcome::Idle;
    }
    if let Some(gate) = manager.gate()
        && gate.state() != CircuitState::Closed
    {
        debug!(state = gate.state().label(), "circuit not closed, skipping background renewal");
        return CycleOutcome::GateNotClosed;
    }

    debug!("access credential inside renewal window, renewing");
    match manager.renew().await {
        Some(_) => CycleOutcome::Renewed,
        None => CycleOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuth, NOW, harness, harness_with, seed, token};
    use common::{EventBus, MockClock};
    use resilience::{FailureIsolationGate, GateConfig};
    use transport::TransportError;

    #[tokio::test]
    async fn idle_without_session() {
        let auth = FakeAuth::issuing("bg");
        let h = harness(auth.clone()).await;
        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::Idle);
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn idle_while_access_is_fresh() {
        let auth = FakeAuth::issuing("bg");
        let h = harness(auth.clone()).await;
        seed(&h.store, 3_600, 86_400).await;
        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::Idle);
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn renews_inside_window() {
        let auth = FakeAuth::issuing("bg");
        let h = harness(auth.clone()).await;
        seed(&h.store, 100, 86_400).await;

        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::Renewed);
        let access = h.store.read(CredentialKind::Access).await.unwrap();
        assert_eq!(access.token().expose(), &token("bg-access", NOW + 900));
    }

    #[tokio::test]
    async fn failure_ends_session() {
        let auth = FakeAuth::failing(TransportError::Status {
            status: 401,
            body: String::new(),
        });
        let h = harness(auth).await;
        seed(&h.store, 100, 86_400).await;

        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::Failed);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn skips_while_circuit_open() {
        let auth = FakeAuth::issuing("bg");
        let gate = Arc::new(
            FailureIsolationGate::new(
                GateConfig {
                    failure_threshold: 1,
                    ..GateConfig::default()
                },
                Arc::new(MockClock::at_unix(NOW)),
                EventBus::default(),
            )
            .unwrap(),
        );
        gate.record_failure();
        let g = gate.clone();
        let h = harness_with(auth.clone(), move |m| m.with_gate(g)).await;
        seed(&h.store, 100, 86_400).await;

        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::GateNotClosed);
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn skips_while_another_call_holds_the_probe() {
        let auth = FakeAuth::issuing("bg");
        let clock = MockClock::at_unix(NOW);
        let gate = Arc::new(
            FailureIsolationGate::new(
                GateConfig {
                    failure_threshold: 1,
                    cooldown: Duration::from_secs(10),
                },
                Arc::new(clock.clone()),
                EventBus::default(),
            )
            .unwrap(),
        );
        gate.record_failure();
        clock.advance_secs(10);
        assert!(gate.can_attempt());
        assert!(!gate.can_attempt());

        let g = gate.clone();
        let h = harness_with(auth.clone(), move |m| m.with_gate(g)).await;
        seed(&h.store, 100, 86_400).await;

        assert_eq!(renewal_cycle(&h.manager).await, CycleOutcome::GateNotClosed);
        assert_eq!(auth.calls(), 0);
        assert_eq!(gate.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_renews_on_tick() {
        let auth = FakeAuth::issuing("bg");
        let h = harness(auth.clone()).await;
        seed(&h.store, 100, 86_400).await;

        let handle = spawn_renewal_task(h.manager.clone(), Duration::from_secs(15));
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();

        assert_eq!(auth.calls(), 1);
        let access = h.store.read(CredentialKind::Access).await.unwrap();
        assert_eq!(access.expires_at(), NOW + 900);
    }
}
