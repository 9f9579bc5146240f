//! Usable-credential decisions and single-flight renewal
//!
//! The manager reads credentials from `CredentialStore` on every call; the
//! store is the single source of truth. Renewal is coordinated through one
//! slot holding the in-flight operation as a `Shared` future over a spawned
//! task:
//!
//! - the first caller that finds the slot empty spawns the renewal and parks
//!   its handle in the slot;
//! - every later caller clones the handle and awaits the same result;
//! - the task empties the slot itself once the refresh call settles, so the
//!   slot never outlives the operation and an abandoned caller cannot leave a
//!   renewal half-done.
//!
//! The slot is guarded by a `std::sync::Mutex` that is only held to inspect or
//! replace the handle, never across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::{Clock, EventBus, LifecycleEvent, Secret};
use credentials::{AuthEndpoints, Credential, CredentialKind, CredentialStore};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use resilience::FailureIsolationGate;
use serde::Serialize;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::{Error, Result};

/// When to renew, and how long a refresh call may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Renew proactively once the access credential has less than this left.
    pub renewal_window: Duration,
    /// Below this much remaining life the access credential is not handed out.
    pub safety_margin: Duration,
    pub refresh_timeout: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            renewal_window: Duration::from_secs(120),
            safety_margin: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

impl RenewalPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.renewal_window.is_zero() {
            return Err(Error::InvalidPolicy("renewal_window must be non-zero".into()));
        }
        if self.refresh_timeout.is_zero() {
            return Err(Error::InvalidPolicy("refresh_timeout must be non-zero".into()));
        }
        if self.safety_margin > self.renewal_window {
            return Err(Error::InvalidPolicy(format!(
                "safety_margin ({}s) exceeds renewal_window ({}s)",
                self.safety_margin.as_secs(),
                self.renewal_window.as_secs()
            )));
        }
        Ok(())
    }
}

/// Session summary for health and status endpoints. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// A live refresh credential is stored.
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_expires_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in_secs: Option<u64>,
}

type RenewalHandle = Shared<BoxFuture<'static, Option<Credential>>>;

struct InFlight {
    generation: u64,
    handle: RenewalHandle,
}

/// Session-wide credential manager. One per process, shared via `Arc`.
pub struct CredentialLifecycleManager {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
    policy: RenewalPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
    gate: Option<Arc<FailureIsolationGate>>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    generation: AtomicU64,
}

impl CredentialLifecycleManager {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        endpoints: AuthEndpoints,
        policy: RenewalPolicy,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            store,
            transport,
            endpoints,
            policy,
            clock,
            events,
            gate: None,
            in_flight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        })
    }

    /// Report refresh-call outcomes to `gate`: network failures, timeouts and
    /// 5xx count as failures, a successful refresh as a success.
    pub fn with_gate(mut self, gate: Arc<FailureIsolationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    pub fn gate(&self) -> Option<&Arc<FailureIsolationGate>> {
        self.gate.as_ref()
    }

    /// Whether the session can be carried forward by a renewal: a live refresh
    /// credential is stored and the access credential is missing or due for
    /// renewal. A missing or expired refresh credential ends the session.
    pub async fn has_usable_session(&self) -> bool {
        if self.store.read(CredentialKind::Refresh).await.is_none() {
            self.end_session("refresh credential absent or expired").await;
            return false;
        }
        let now = self.clock.unix_now();
        match self.store.read(CredentialKind::Access).await {
            None => true,
            Some(access) => access.remaining(now) < self.policy.renewal_window,
        }
    }

    pub async fn needs_proactive_renewal(&self) -> bool {
        let now = self.clock.unix_now();
        match self.store.read(CredentialKind::Access).await {
            None => true,
            Some(access) => access.remaining(now) < self.policy.renewal_window,
        }
    }

    /// The access credential to attach to a request, renewing first if less
    /// than the safety margin remains. `None` means there is no session.
    pub async fn get_usable_credential(&self) -> Option<Credential> {
        if self.store.read(CredentialKind::Refresh).await.is_none() {
            self.end_session("refresh credential absent or expired").await;
            return None;
        }

        let now = self.clock.unix_now();
        if let Some(access) = self.store.read(CredentialKind::Access).await {
            if access.remaining(now) > self.policy.safety_margin {
                return Some(access);
            }
            debug!(
                remaining_secs = access.remaining(now).as_secs(),
                "access credential inside safety margin"
            );
        }
        self.renew().await
    }

    /// Renew the credential pair, joining the in-flight renewal if there is one.
    pub async fn renew(&self) -> Option<Credential> {
        let handle = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(op) => {
                    debug!(generation = op.generation, "joining in-flight renewal");
                    op.handle.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let handle = self.spawn_renewal(generation);
                    *slot = Some(InFlight {
                        generation,
                        handle: handle.clone(),
                    });
                    handle
                }
            }
        };
        handle.await
    }

    /// Exchange a username and password for a fresh session.
    pub async fn sign_in(&self, username: &str, password: &Secret<String>) -> Result<Credential> {
        let pair = credentials::sign_in(
            self.transport.as_ref(),
            &self.endpoints,
            username,
            password,
            self.policy.refresh_timeout,
        )
        .await?;
        self.store.write(&pair).await?;
        info!(subject = pair.access.subject().unwrap_or("-"), "signed in");
        Ok(pair.access)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.store.clear().await?;
        info!("signed out");
        Ok(())
    }

    pub async fn session_status(&self) -> SessionStatus {
        let now = self.clock.unix_now();
        let access = self.store.read(CredentialKind::Access).await;
        let refresh = self.store.read(CredentialKind::Refresh).await;
        let identity = access.as_ref().or(refresh.as_ref());
        SessionStatus {
            authenticated: refresh.is_some(),
            subject: identity.and_then(|c| c.subject()).map(str::to_owned),
            role: identity.and_then(|c| c.role()).map(str::to_owned),
            access_expires_in_secs: access.as_ref().map(|c| c.remaining(now).as_secs()),
            refresh_expires_in_secs: refresh.as_ref().map(|c| c.remaining(now).as_secs()),
        }
    }

    fn spawn_renewal(&self, generation: u64) -> RenewalHandle {
        let renewal = Renewal {
            store: self.store.clone(),
            transport: self.transport.clone(),
            endpoints: self.endpoints.clone(),
            policy: self.policy,
            clock: self.clock.clone(),
            events: self.events.clone(),
            gate: self.gate.clone(),
        };
        let slot = self.in_flight.clone();

        let task = tokio::spawn(async move {
            let outcome = renewal.run(generation).await;
            let mut slot = lock(&slot);
            if slot.as_ref().is_some_and(|op| op.generation == generation) {
                *slot = None;
            }
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(generation, error = %e, "renewal task did not complete");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn end_session(&self, reason: &str) {
        if self.store.is_empty().await {
            return;
        }
        info!(reason, "session unrecoverable, clearing credentials");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
    }
}

/// Everything one renewal needs, owned so it can run on its own task.
struct Renewal {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
    policy: RenewalPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
    gate: Option<Arc<FailureIsolationGate>>,
}

impl Renewal {
    async fn run(self, generation: u64) -> Option<Credential> {
        let Some(refresh) = self.store.read(CredentialKind::Refresh).await else {
            debug!(generation, "no live refresh credential, nothing to renew");
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "failed to clear credential store");
            }
            record_outcome("no_session");
            return None;
        };

        // A renewal that settled just before this one started already rotated
        // the pair.
        let now = self.clock.unix_now();
        if let Some(access) = self.store.read(CredentialKind::Access).await
            && access.remaining(now) >= self.policy.renewal_window
        {
            debug!(generation, "credential already renewed, reusing");
            return Some(access);
        }

        debug!(generation, "calling refresh endpoint");
        let result = credentials::refresh_credentials(
            self.transport.as_ref(),
            &self.endpoints,
            &refresh,
            self.policy.refresh_timeout,
        )
        .await;

        let pair = match result {
            Ok(pair) => {
                // The call this renewal serves reports its own outcome; under a
                // half-open probe only that outcome may close the circuit.
                if let Some(gate) = &self.gate {
                    gate.record_side_success();
                }
                pair
            }
            Err(e) => {
                if let (Some(gate), credentials::Error::Transport(te)) = (&self.gate, &e)
                    && transport::classify(te).counts_against_circuit()
                {
                    gate.record_failure();
                }
                return self.fail(generation, e.to_string()).await;
            }
        };

        if let Err(e) = self.store.write(&pair).await {
            return self.fail(generation, e.to_string()).await;
        }

        info!(
            generation,
            access_expires_at = pair.access.expires_at(),
            "credential renewed"
        );
        record_outcome("success");
        self.events.publish(LifecycleEvent::CredentialRenewed);
        Some(pair.access)
    }

    async fn fail(&self, generation: u64, reason: String) -> Option<Credential> {
        warn!(generation, reason = %reason, "credential renewal failed, ending session");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
        record_outcome("failure");
        self.events
            .publish(LifecycleEvent::CredentialRenewalFailed { reason });
        None
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("credential_renewals_total", "outcome" => outcome).increment(1);
}

fn lock(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
