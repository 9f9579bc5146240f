//! Credential storage
//!
//! Keeps the session's access and refresh credentials in a `SessionStorage`
//! backend. A tokio Mutex serializes writes from request-time renewal, the
//! background renewal task, and sign-out. The in-memory view only changes after
//! the backend accepted the new snapshot, so readers never observe a
//! half-rotated pair. The one exception is `clear`, which forgets the pair in
//! memory first and keeps retrying the backend until it is empty too.

use std::sync::Arc;

use common::Clock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialKind, CredentialPair};
use crate::error::Result;
use crate::storage::{EntryScope, SessionStorage, Snapshot, StoredEntry};

/// Session-wide credential store. One instance per process, shared via `Arc`.
pub struct CredentialStore {
    storage: Arc<dyn SessionStorage>,
    scope: EntryScope,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

struct State {
    snapshot: Snapshot,
    /// A clear emptied memory but the backend still holds the old snapshot.
    backend_stale: bool,
}

impl CredentialStore {
    /// Load whatever the backend already holds, minus entries that expired
    /// while it sat there.
    pub async fn open(
        storage: Arc<dyn SessionStorage>,
        scope: EntryScope,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut snapshot = storage.load().await?;
        let now = clock.unix_now();
        snapshot.retain(|_, entry| entry.is_live(now));
        info!(entries = snapshot.len(), "credential store opened");
        Ok(Self {
            storage,
            scope,
            clock,
            state: Mutex::new(State {
                snapshot,
                backend_stale: false,
            }),
        })
    }

    /// The stored credential of `kind`, if present, unexpired, and well-formed.
    pub async fn read(&self, kind: CredentialKind) -> Option<Credential> {
        let now = self.clock.unix_now();
        let state = self.state.lock().await;
        let entry = state.snapshot.get(kind.key())?;
        if !entry.is_live(now) {
            debug!(kind = %kind, "stored credential past its expiry");
            return None;
        }
        match Credential::parse(entry.value.clone()) {
            Ok(credential) if !credential.is_expired(now) => Some(credential),
            Ok(_) => None,
            Err(e) => {
                warn!(kind = %kind, error = %e, "ignoring malformed stored credential");
                None
            }
        }
    }

    /// Replace both credentials at once.
    ///
    /// Rejects the pair (store unchanged) if either member has already expired.
    pub async fn write(&self, pair: &CredentialPair) -> Result<()> {
        pair.ensure_unexpired(self.clock.unix_now())?;

        let mut state = self.state.lock().await;
        let mut next = state.snapshot.clone();
        for kind in [CredentialKind::Access, CredentialKind::Refresh] {
            let credential = pair.get(kind);
            next.insert(
                kind.key().to_string(),
                StoredEntry {
                    value: credential.token().expose().clone(),
                    expires_at: credential.expires_at(),
                    scope: self.scope.clone(),
                },
            );
        }

        self.storage.save(&next).await?;
        state.snapshot = next;
        state.backend_stale = false;
        debug!(
            access_expires_at = pair.access.expires_at(),
            refresh_expires_at = pair.refresh.expires_at(),
            "stored credential pair"
        );
        Ok(())
    }

    /// Parse and store raw tokens; malformed input leaves the store unchanged.
    pub async fn write_tokens(&self, access: &str, refresh: &str) -> Result<()> {
        let pair = CredentialPair::parse(access, refresh)?;
        self.write(&pair).await
    }

    /// Forget both credentials. Idempotent.
    ///
    /// The in-memory view is emptied before the backend is touched, so even a
    /// failing backend never lets known-bad material be read back. A failed
    /// backend save is retried by the next `clear`.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.snapshot.is_empty() && !state.backend_stale {
            return Ok(());
        }
        state.snapshot.clear();
        state.backend_stale = true;
        self.storage.save(&state.snapshot).await?;
        state.backend_stale = false;
        info!("credential store cleared");
        Ok(())
    }

    /// True once both credentials are gone from memory and from the backend.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.snapshot.is_empty() && !state.backend_stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{FileStorage, MemoryStorage};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use common::MockClock;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};

    const NOW: u64 = 1_700_000_000;

    fn token(label: &str, exp: u64) -> String {
        format!(
            "{}.{}.{label}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{exp}}}"#))
        )
    }

    async fn memory_store(clock: &MockClock) -> CredentialStore {
        CredentialStore::open(
            Arc::new(MemoryStorage::new()),
            EntryScope::default(),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap()
    }

    /// Backend whose saves can be switched to fail, to simulate a write that
    /// dies part-way through a rotation.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail: AtomicBool,
    }

    impl SessionStorage for FlakyStorage {
        fn load(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>> {
            self.inner.load()
        }

        fn save<'a>(&'a self, snapshot: &'a Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            if self.fail.load(Ordering::SeqCst) {
                return Box::pin(async { Err(Error::Storage("disk full".into())) });
            }
            self.inner.save(snapshot)
        }
    }

    #[tokio::test]
    async fn write_then_read_both_kinds() {
        let clock = MockClock::at_unix(NOW);
        let store = memory_store(&clock).await;

        store
            .write_tokens(&token("a1", NOW + 300), &token("r1", NOW + 86_400))
            .await
            .unwrap();

        let access = store.read(CredentialKind::Access).await.unwrap();
        let refresh = store.read(CredentialKind::Refresh).await.unwrap();
        assert_eq!(access.token().expose(), &token("a1", NOW + 300));
        assert_eq!(refresh.expires_at(), NOW + 86_400);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let clock = MockClock::at_unix(NOW);
        let store = memory_store(&clock).await;
        store
            .write_tokens(&token("a", NOW + 60), &token("r", NOW + 600))
            .await
            .unwrap();

        clock.advance_secs(61);
        assert!(store.read(CredentialKind::Access).await.is_none());
        assert!(store.read(CredentialKind::Refresh).await.is_some());
    }

    #[tokio::test]
    async fn malformed_write_leaves_store_unchanged() {
        let clock = MockClock::at_unix(NOW);
        let store = memory_store(&clock).await;
        store
            .write_tokens(&token("a1", NOW + 300), &token("r1", NOW + 600))
            .await
            .unwrap();

        let result = store.write_tokens("not-a-token", &token("r2", NOW + 900)).await;
        assert!(matches!(result, Err(Error::Malformed(_))));

        let refresh = store.read(CredentialKind::Refresh).await.unwrap();
        assert_eq!(refresh.token().expose(), &token("r1", NOW + 600));
    }

    #[tokio::test]
    async fn expired_write_is_rejected() {
        let clock = MockClock::at_unix(NOW);
        let store = memory_store(&clock).await;

        let result = store
            .write_tokens(&token("a", NOW + 300), &token("r", NOW - 1))
            .await;
        assert!(matches!(
            result,
            Err(Error::CredentialExpired(CredentialKind::Refresh))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_pair() {
        let clock = MockClock::at_unix(NOW);
        let storage = Arc::new(FlakyStorage::default());
        let store = CredentialStore::open(
            storage.clone(),
            EntryScope::default(),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap();
        store
            .write_tokens(&token("a1", NOW + 300), &token("r1", NOW + 600))
            .await
            .unwrap();

        storage.fail.store(true, Ordering::SeqCst);
        let result = store
            .write_tokens(&token("a2", NOW + 300), &token("r2", NOW + 600))
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));

        // Neither half of the new pair is visible.
        let access = store.read(CredentialKind::Access).await.unwrap();
        let refresh = store.read(CredentialKind::Refresh).await.unwrap();
        assert_eq!(access.token().expose(), &token("a1", NOW + 300));
        assert_eq!(refresh.token().expose(), &token("r1", NOW + 600));
        let persisted = storage.inner.load().await.unwrap();
        assert_eq!(persisted["access"].value, token("a1", NOW + 300));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let clock = MockClock::at_unix(NOW);
        let store = memory_store(&clock).await;

        store.clear().await.unwrap();
        store
            .write_tokens(&token("a", NOW + 300), &token("r", NOW + 600))
            .await
            .unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.read(CredentialKind::Refresh).await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_memory_even_if_backend_fails() {
        let clock = MockClock::at_unix(NOW);
        let storage = Arc::new(FlakyStorage::default());
        let store = CredentialStore::open(
            storage.clone(),
            EntryScope::default(),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap();
        store
            .write_tokens(&token("a", NOW + 300), &token("r", NOW + 600))
            .await
            .unwrap();

        storage.fail.store(true, Ordering::SeqCst);
        assert!(store.clear().await.is_err());
        assert!(store.read(CredentialKind::Access).await.is_none());
        assert!(!store.is_empty().await, "backend still holds the old pair");

        // Once the backend recovers, the next clear reaches it.
        storage.fail.store(false, Ordering::SeqCst);
        store.clear().await.unwrap();
        assert!(store.is_empty().await);
        assert!(storage.inner.load().await.unwrap().is_empty());

        let reopened = CredentialStore::open(storage, EntryScope::default(), Arc::new(clock))
            .await
            .unwrap();
        assert!(reopened.read(CredentialKind::Refresh).await.is_none());
    }

    #[tokio::test]
    async fn open_drops_entries_expired_by_the_injected_clock() {
        let clock = MockClock::at_unix(NOW);
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::open(storage.clone(), EntryScope::default(), Arc::new(clock.clone()))
            .await
            .unwrap();
        store
            .write_tokens(&token("a", NOW + 60), &token("r", NOW + 600))
            .await
            .unwrap();

        clock.advance_secs(120);
        let reopened = CredentialStore::open(storage, EntryScope::default(), Arc::new(clock))
            .await
            .unwrap();
        assert!(reopened.read(CredentialKind::Access).await.is_none());
        assert!(reopened.read(CredentialKind::Refresh).await.is_some());
        assert!(!reopened.state.lock().await.snapshot.contains_key("access"));
    }

    #[tokio::test]
    async fn entries_carry_scope_and_expiry() {
        let clock = MockClock::at_unix(NOW);
        let storage = Arc::new(MemoryStorage::new());
        let scope = EntryScope {
            path: "/app".into(),
            ..EntryScope::default()
        };
        let store = CredentialStore::open(storage.clone(), scope.clone(), Arc::new(clock.clone()))
            .await
            .unwrap();
        store
            .write_tokens(&token("a", NOW + 300), &token("r", NOW + 600))
            .await
            .unwrap();

        let persisted = storage.load().await.unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted["access"].expires_at, NOW + 300);
        assert_eq!(persisted["refresh"].scope, scope);
    }

    #[tokio::test]
    async fn reopen_from_file_restores_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let clock = common::SystemClock;
        let now = clock.unix_now();

        let store = CredentialStore::open(
            Arc::new(FileStorage::new(path.clone())),
            EntryScope::default(),
            Arc::new(clock),
        )
        .await
        .unwrap();
        store
            .write_tokens(&token("a", now + 300), &token("r", now + 600))
            .await
            .unwrap();

        let reopened = CredentialStore::open(
            Arc::new(FileStorage::new(path)),
            EntryScope::default(),
            Arc::new(clock),
        )
        .await
        .unwrap();
        assert!(reopened.read(CredentialKind::Refresh).await.is_some());
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let clock = MockClock::at_unix(NOW);
        let store = Arc::new(memory_store(&clock).await);

        let mut handles = vec![];
        for i in 0..10u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .write_tokens(&token(&format!("a{i}"), NOW + 300 + i), &token(&format!("r{i}"), NOW + 900 + i))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whatever write landed last, access and refresh come from the same pair.
        let access = store.read(CredentialKind::Access).await.unwrap();
        let refresh = store.read(CredentialKind::Refresh).await.unwrap();
        assert_eq!(
            access.expires_at() - (NOW + 300),
            refresh.expires_at() - (NOW + 900)
        );
    }
}
