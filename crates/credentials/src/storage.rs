//! Session storage backends
//!
//! Storage is a small key/value map whose entries carry their own expiry and
//! scoping attributes, the way a browser cookie jar does. Backends only load and
//! save whole snapshots; `CredentialStore` builds the next snapshot in memory and
//! hands it over in one `save`, so a rotation either lands completely or not at
//! all.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

/// Scoping attributes attached to every stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryScope {
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for EntryScope {
    fn default() -> Self {
        Self {
            path: "/".into(),
            secure: true,
            same_site: SameSite::Strict,
        }
    }
}

/// One stored token with its expiry (unix seconds) and scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: String,
    pub expires_at: u64,
    pub scope: EntryScope,
}

impl StoredEntry {
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for StoredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredEntry")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Full contents of session storage, keyed by entry name.
pub type Snapshot = BTreeMap<String, StoredEntry>;

/// Backend holding the session snapshot.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn SessionStorage>`).
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>>;

    /// Replace the stored snapshot. Must be all-or-nothing.
    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Process-lifetime storage: the session ends with the process.
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>> {
        Box::pin(async move { Ok(self.snapshot.lock().await.clone()) })
    }

    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *self.snapshot.lock().await = snapshot.clone();
            Ok(())
        })
    }
}

/// JSON session file, written atomically with owner-only permissions.
///
/// The file is returned as written; `CredentialStore::open` drops entries that
/// expired while it sat on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_snapshot(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "session file not found, starting with empty session");
            return Ok(Snapshot::new());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Storage(format!("reading session file: {e}")))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("parsing session file: {e}")))?;

        debug!(path = %self.path.display(), entries = snapshot.len(), "loaded session file");
        Ok(snapshot)
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>> {
        Box::pin(self.read_snapshot())
    }

    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(write_atomic(&self.path, snapshot))
    }
}

/// Write the snapshot to a temp file in the same directory, then rename it
/// over the target. Sets 0600 permissions on unix since the file holds tokens.
async fn write_atomic(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| Error::Storage(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), entries = snapshot.len(), "persisted session");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, expires_at: u64) -> StoredEntry {
        StoredEntry {
            value: value.into(),
            expires_at,
            scope: EntryScope::default(),
        }
    }

    fn far_future() -> u64 {
        4_102_444_800
    }

    #[tokio::test]
    async fn memory_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.load().await.unwrap().is_empty());

        let mut snapshot = Snapshot::new();
        snapshot.insert("access".into(), entry("a", far_future()));
        storage.save(&snapshot).await.unwrap();

        assert_eq!(storage.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn file_roundtrip_preserves_scope() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("session.json"));

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "refresh".into(),
            StoredEntry {
                value: "r".into(),
                expires_at: far_future(),
                scope: EntryScope {
                    path: "/api".into(),
                    secure: false,
                    same_site: SameSite::Lax,
                },
            },
        );
        storage.save(&snapshot).await.unwrap();

        let reloaded = FileStorage::new(dir.path().join("session.json"));
        assert_eq!(reloaded.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn file_load_keeps_entries_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("session.json"));

        let mut snapshot = Snapshot::new();
        snapshot.insert("access".into(), entry("old", 1_000));
        snapshot.insert("refresh".into(), entry("live", far_future()));
        storage.save(&snapshot).await.unwrap();

        assert_eq!(storage.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let storage = FileStorage::new(path);
        assert!(matches!(storage.load().await, Err(Error::Storage(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let storage = FileStorage::new(path.clone());
        storage.save(&Snapshot::new()).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "session file must be 0600, got {mode:o}");
    }

    #[test]
    fn debug_redacts_value() {
        let rendered = format!("{:?}", entry("super-secret", 5));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("expires_at"));
    }
}
