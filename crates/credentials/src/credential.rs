//! Credential and credential-pair types

use std::fmt;
use std::time::Duration;

use common::Secret;

use crate::claims::{Claims, decode_claims};
use crate::error::{Error, Result};

/// The two bearer tokens a session holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Short-lived, attached to every authorized request
    Access,
    /// Long-lived, only used to mint a new pair
    Refresh,
}

impl CredentialKind {
    /// Storage key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            CredentialKind::Access => "access",
            CredentialKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A parsed bearer token. Construction guarantees the token is header-safe and
/// its claims decode with an expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: Secret<String>,
    claims: Claims,
}

impl Credential {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::Malformed("empty token".into()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='))
        {
            return Err(Error::Malformed(
                "token contains characters outside base64url".into(),
            ));
        }
        let claims = decode_claims(&raw)?;
        Ok(Self {
            token: Secret::new(raw),
            claims,
        })
    }

    pub fn token(&self) -> &Secret<String> {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.claims.role.as_deref()
    }

    /// Expiry as unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.claims.is_expired(now)
    }

    /// Remaining lifetime at `now` (unix seconds).
    pub fn remaining(&self, now: u64) -> Duration {
        Duration::from_secs(self.claims.remaining_secs(now))
    }
}

/// Access and refresh credentials, always stored and rotated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: Credential,
    pub refresh: Credential,
}

impl CredentialPair {
    /// Parse both raw tokens; fails if either is malformed.
    pub fn parse(access: impl Into<String>, refresh: impl Into<String>) -> Result<Self> {
        Ok(Self {
            access: Credential::parse(access)?,
            refresh: Credential::parse(refresh)?,
        })
    }

    pub fn get(&self, kind: CredentialKind) -> &Credential {
        match kind {
            CredentialKind::Access => &self.access,
            CredentialKind::Refresh => &self.refresh,
        }
    }

    /// Fail with `CredentialExpired` if either member has expired at `now`.
    pub fn ensure_unexpired(&self, now: u64) -> Result<()> {
        for kind in [CredentialKind::Access, CredentialKind::Refresh] {
            if self.get(kind).is_expired(now) {
                return Err(Error::CredentialExpired(kind));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token(sub: &str, exp: u64) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{sub}","role":"member","exp":{exp}}}"#))
        )
    }

    #[test]
    fn parse_exposes_claims() {
        let credential = Credential::parse(token("u-1", 2_000)).unwrap();
        assert_eq!(credential.subject(), Some("u-1"));
        assert_eq!(credential.role(), Some("member"));
        assert_eq!(credential.expires_at(), 2_000);
        assert_eq!(credential.remaining(1_400), Duration::from_secs(600));
        assert!(!credential.is_expired(1_999));
        assert!(credential.is_expired(2_000));
    }

    #[test]
    fn parse_rejects_header_unsafe_tokens() {
        let mut raw = token("u-1", 2_000);
        raw.push('\n');
        assert!(matches!(Credential::parse(raw), Err(Error::Malformed(_))));
        assert!(matches!(Credential::parse(""), Err(Error::Malformed(_))));
    }

    #[test]
    fn debug_never_prints_token() {
        let raw = token("u-1", 2_000);
        let credential = Credential::parse(raw.clone()).unwrap();
        assert!(!format!("{credential:?}").contains(&raw));
    }

    #[test]
    fn pair_parse_fails_if_either_is_malformed() {
        assert!(CredentialPair::parse(token("u", 10), "garbage").is_err());
        assert!(CredentialPair::parse("garbage", token("u", 10)).is_err());
        assert!(CredentialPair::parse(token("u", 10), token("u", 20)).is_ok());
    }

    #[test]
    fn ensure_unexpired_names_the_expired_member() {
        let pair = CredentialPair::parse(token("u", 100), token("u", 50)).unwrap();
        assert!(pair.ensure_unexpired(10).is_ok());
        assert!(matches!(
            pair.ensure_unexpired(60),
            Err(Error::CredentialExpired(CredentialKind::Refresh))
        ));
        assert!(matches!(
            pair.ensure_unexpired(100),
            Err(Error::CredentialExpired(CredentialKind::Access))
        ));
    }

    #[test]
    fn kind_keys() {
        assert_eq!(CredentialKind::Access.key(), "access");
        assert_eq!(CredentialKind::Refresh.to_string(), "refresh");
    }
}
