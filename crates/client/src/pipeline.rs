//! Request pipeline
//!
//! Wraps every outbound call with the circuit breaker and the credential
//! lifecycle. The pipeline owns no state of its own beyond configuration; the
//! gate, the manager, and the store are shared `Arc`s so the gateway's
//! background renewal task sees the same session.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, EventBus, LifecycleEvent, Secret};
use credentials::{CredentialStore, FileStorage, MemoryStorage, SessionStorage};
use resilience::{FailureIsolationGate, Passage};
use session::{CredentialLifecycleManager, SessionStatus};
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, CallKind, ClassifiedError, HttpTransport, Transport, TransportError, classify};

use crate::config::{ClientConfig, StorageConfig};
use crate::error::Result;
use crate::health::ServiceHealth;

pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    manager: Arc<CredentialLifecycleManager>,
    gate: Arc<FailureIsolationGate>,
    events: EventBus,
    request_timeout: Duration,
    gate_exempt_paths: Vec<String>,
}

/// Returns a half-open probe to the gate if the call that claimed it ends
/// without recording success or failure.
struct ProbeRelease<'a>(Option<&'a FailureIsolationGate>);

impl Drop for ProbeRelease<'_> {
    fn drop(&mut self) {
        if let Some(gate) = self.0 {
            gate.release_probe();
        }
    }
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        manager: Arc<CredentialLifecycleManager>,
        gate: Arc<FailureIsolationGate>,
        events: EventBus,
        request_timeout: Duration,
        gate_exempt_paths: Vec<String>,
    ) -> Self {
        Self {
            transport,
            manager,
            gate,
            events,
            request_timeout,
            gate_exempt_paths,
        }
    }

    /// Assemble the full stack from configuration: reqwest transport, session
    /// storage, credential store, gate, and lifecycle manager.
    pub async fn from_config(config: &ClientConfig, clock: Arc<dyn Clock>, events: EventBus) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            http,
            &config.base_url,
            config.request_timeout(),
        ));

        let storage: Arc<dyn SessionStorage> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryStorage::new()),
            StorageConfig::File { path } => Arc::new(FileStorage::new(path.clone())),
        };
        let store = Arc::new(CredentialStore::open(storage, config.cookie.clone(), clock.clone()).await?);

        let gate = Arc::new(FailureIsolationGate::new(
            config.gate_config(),
            clock.clone(),
            events.clone(),
        )?);
        let manager = CredentialLifecycleManager::new(
            store,
            transport.clone(),
            config.endpoints(),
            config.renewal_policy(),
            clock,
            events.clone(),
        )?
        .with_gate(gate.clone());

        info!(
            base_url = %config.base_url,
            failure_threshold = config.failure_threshold,
            cooldown_secs = config.cooldown_secs,
            "request pipeline ready"
        );
        Ok(Self::new(
            transport,
            Arc::new(manager),
            gate,
            events,
            config.request_timeout(),
            config.gate_exempt_paths.clone(),
        ))
    }

    pub fn manager(&self) -> &Arc<CredentialLifecycleManager> {
        &self.manager
    }

    pub fn gate(&self) -> &Arc<FailureIsolationGate> {
        &self.gate
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn is_gate_exempt(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.gate_exempt_paths.iter().any(|exempt| exempt == path)
    }

    /// Claim passage through the gate. `Err` means fail fast; `Ok` carries the
    /// probe release for calls that claimed the half-open probe.
    fn pass_gate(&self, gated: bool) -> std::result::Result<ProbeRelease<'_>, ClassifiedError> {
        if !gated {
            return Ok(ProbeRelease(None));
        }
        match self.gate.try_acquire() {
            None => {
                debug!("circuit open, failing fast");
                Err(ClassifiedError::ServiceUnavailable)
            }
            Some(Passage::Closed) => Ok(ProbeRelease(None)),
            Some(Passage::Probe) => Ok(ProbeRelease(Some(self.gate.as_ref()))),
        }
    }

    /// Send one request to the remote API.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, mut request: ApiRequest) -> std::result::Result<ApiResponse, ClassifiedError> {
        let gated = !self.is_gate_exempt(&request.path);
        let _probe = self.pass_gate(gated)?;

        if request.requires_auth {
            let credential = if self.manager.needs_proactive_renewal().await
                && self.manager.has_usable_session().await
            {
                debug!("access credential inside renewal window, renewing before use");
                self.manager.renew().await
            } else {
                self.manager.get_usable_credential().await
            };

            let Some(credential) = credential else {
                debug!("no usable credential, not dispatching");
                self.events.publish(LifecycleEvent::RequestUnauthorized {
                    path: request.path.clone(),
                });
                return Err(ClassifiedError::Unauthorized);
            };
            if let Err(e) = request.set_bearer(credential.token().expose()) {
                warn!(error = %e, "credential not usable as a header value");
                return Err(ClassifiedError::Unauthorized);
            }
        }

        let kind = request.kind;
        let path = request.path.clone();
        let timeout = request.timeout.unwrap_or(self.request_timeout);
        let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match outcome {
            Ok(response) => {
                if gated {
                    self.gate.record_success();
                }
                debug!(status = response.status, "request succeeded");
                Ok(response)
            }
            Err(e) => {
                let classified = classify(&e);
                if gated && classified.counts_against_circuit() {
                    self.gate.record_failure();
                }
                if classified == ClassifiedError::Unauthorized && kind == CallKind::Standard {
                    self.reject_session(&path).await;
                }
                debug!(error = %e, classified = classified.label(), "request failed");
                Err(classified)
            }
        }
    }

    /// Sign in through the gate; a rejection never clears anything.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn sign_in(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> std::result::Result<SessionStatus, ClassifiedError> {
        let _probe = self.pass_gate(true)?;

        match self.manager.sign_in(username, password).await {
            Ok(_) => {
                self.gate.record_success();
                Ok(self.manager.session_status().await)
            }
            Err(session::Error::Credentials(credentials::Error::SignInRejected(reason))) => {
                debug!(reason = %reason, "sign-in rejected");
                Err(ClassifiedError::Unauthorized)
            }
            Err(session::Error::Credentials(credentials::Error::Transport(e))) => {
                let classified = classify(&e);
                if classified.counts_against_circuit() {
                    self.gate.record_failure();
                }
                Err(classified)
            }
            Err(e) => {
                warn!(error = %e, "sign-in response unusable");
                self.gate.record_success();
                Err(ClassifiedError::ServerError { status: 502 })
            }
        }
    }

    pub async fn sign_out(&self) -> session::Result<()> {
        self.manager.sign_out().await
    }

    pub async fn health(&self) -> ServiceHealth {
        ServiceHealth::new(self.gate.snapshot(), self.manager.session_status().await)
    }

    /// The remote refused our access credential: forget the session and tell
    /// observers. Caches owned by other layers react to the event.
    async fn reject_session(&self, path: &str) {
        warn!(path, "request unauthorized, clearing stored credentials");
        if let Err(e) = self.manager.sign_out().await {
            warn!(error = %e, "failed to clear credentials after 401");
        }
        self.events.publish(LifecycleEvent::RequestUnauthorized {
            path: path.to_string(),
        });
    }
}
