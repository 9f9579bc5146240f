//! Session credentials: parsing, storage, and the remote token endpoints
//!
//! A session holds two bearer tokens, a short-lived access credential and a
//! long-lived refresh credential, persisted and rotated together as a
//! `CredentialPair`. This crate knows how to decode their claims, keep them in
//! session storage with per-entry expiry, and exchange a refresh credential (or
//! a username and password) for a new pair. It makes no decision about *when*
//! to renew; that belongs to the session manager.
//!
//! Credential flow:
//! 1. `endpoints::sign_in()` returns the first pair
//! 2. `CredentialStore::write()` validates and stores both entries at once
//! 3. `CredentialStore::read()` hands back unexpired, well-formed credentials
//! 4. `endpoints::refresh_credentials()` mints a replacement pair
//! 5. `CredentialStore::clear()` forgets the session

pub mod claims;
pub mod credential;
pub mod endpoints;
pub mod error;
pub mod storage;
pub mod store;

pub use claims::{Claims, decode_claims};
pub use credential::{Credential, CredentialKind, CredentialPair};
pub use endpoints::{AuthEndpoints, TokenResponse, refresh_credentials, sign_in};
pub use error::{Error, Result};
pub use storage::{EntryScope, FileStorage, MemoryStorage, SameSite, SessionStorage, Snapshot, StoredEntry};
pub use store::CredentialStore;
