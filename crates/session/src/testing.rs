//! Test fixtures: a scripted auth server and token builders

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{EventBus, MockClock};
use credentials::{AuthEndpoints, CredentialStore, EntryScope, MemoryStorage};
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use crate::manager::{CredentialLifecycleManager, RenewalPolicy};

pub const NOW: u64 = 1_700_000_000;

/// Unsigned JWT-shaped token expiring at `exp`; `label` keeps tokens distinct.
pub fn token(label: &str, exp: u64) -> String {
    format!(
        "{}.{}.{label}",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","role":"member","exp":{exp}}}"#))
    )
}

pub fn pair_response(access: &str, refresh: &str) -> ApiResponse {
    ApiResponse::new(
        200,
        serde_json::json!({"accessToken": access, "refreshToken": refresh}).to_string(),
    )
}

/// Auth endpoint stand-in: replies with whatever was scripted last and counts
/// calls.
pub struct FakeAuth {
    pub calls: AtomicUsize,
    reply: Mutex<transport::Result<ApiResponse>>,
    delay: Duration,
}

impl FakeAuth {
    pub fn new(reply: transport::Result<ApiResponse>) -> Arc<Self> {
        Self::with_delay(reply, Duration::from_millis(50))
    }

    pub fn with_delay(reply: transport::Result<ApiResponse>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Mutex::new(reply),
            delay,
        })
    }

    /// Issues a fresh pair valid for 15 minutes (access) and a day (refresh).
    pub fn issuing(label: &str) -> Arc<Self> {
        Self::new(Ok(pair_response(
            &token(&format!("{label}-access"), NOW + 900),
            &token(&format!("{label}-refresh"), NOW + 86_400),
        )))
    }

    pub fn failing(error: TransportError) -> Arc<Self> {
        Self::new(Err(error))
    }

    pub fn set_reply(&self, reply: transport::Result<ApiResponse>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for FakeAuth {
    fn id(&self) -> &str {
        "fake-auth"
    }

    fn send(&self, _request: ApiRequest) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.reply.lock().unwrap().clone();
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            reply
        })
    }
}

pub struct Harness {
    pub manager: Arc<CredentialLifecycleManager>,
    pub store: Arc<CredentialStore>,
    pub clock: MockClock,
    pub events: EventBus,
}

pub async fn harness(auth: Arc<FakeAuth>) -> Harness {
    harness_with(auth, |m| m).await
}

pub async fn harness_with(
    auth: Arc<FakeAuth>,
    customize: impl FnOnce(CredentialLifecycleManager) -> CredentialLifecycleManager,
) -> Harness {
    let clock = MockClock::at_unix(NOW);
    let events = EventBus::default();
    let store = Arc::new(
        CredentialStore::open(
            Arc::new(MemoryStorage::new()),
            EntryScope::default(),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap(),
    );
    let manager = CredentialLifecycleManager::new(
        store.clone(),
        auth,
        AuthEndpoints::default(),
        RenewalPolicy::default(),
        Arc::new(clock.clone()),
        events.clone(),
    )
    .unwrap();
    Harness {
        manager: Arc::new(customize(manager)),
        store,
        clock,
        events,
    }
}

/// Seed the store with an access credential expiring in `access_secs` and a
/// refresh credential expiring in `refresh_secs`.
pub async fn seed(store: &CredentialStore, access_secs: u64, refresh_secs: u64) {
    store
        .write_tokens(
            &token("seed-access", NOW + access_secs),
            &token("seed-refresh", NOW + refresh_secs),
        )
        .await
        .unwrap();
}
