//! Client configuration
//!
//! Deserialized from the `[client]` table of the gateway's TOML file. Every
//! knob has a default except `base_url`.

use std::path::PathBuf;
use std::time::Duration;

use credentials::{AuthEndpoints, EntryScope};
use resilience::GateConfig;
use serde::Deserialize;
use session::RenewalPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Remote API root, e.g. `https://api.example.com`
    pub base_url: String,
    #[serde(default = "default_renewal_window_secs")]
    pub renewal_window_secs: u64,
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// How often the background task looks for a credential due for renewal
    #[serde(default = "default_renewal_check_interval_secs")]
    pub renewal_check_interval_secs: u64,
    #[serde(default = "default_sign_in_path")]
    pub sign_in_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Paths that bypass the circuit breaker, such as a liveness probe
    #[serde(default = "default_gate_exempt_paths")]
    pub gate_exempt_paths: Vec<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Scope attributes stamped on stored credential entries
    #[serde(default)]
    pub cookie: EntryScope,
}

/// Where the session's credentials live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    File { path: PathBuf },
}

fn default_renewal_window_secs() -> u64 {
    120
}

fn default_safety_margin_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_refresh_timeout_ms() -> u64 {
    10_000
}

fn default_renewal_check_interval_secs() -> u64 {
    15
}

fn default_sign_in_path() -> String {
    "/auth/login".into()
}

fn default_refresh_path() -> String {
    "/auth/refresh".into()
}

fn default_gate_exempt_paths() -> Vec<String> {
    vec!["/health".into()]
}

impl ClientConfig {
    /// Defaults for everything but the remote base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            renewal_window_secs: default_renewal_window_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            renewal_check_interval_secs: default_renewal_check_interval_secs(),
            sign_in_path: default_sign_in_path(),
            refresh_path: default_refresh_path(),
            gate_exempt_paths: default_gate_exempt_paths(),
            storage: StorageConfig::default(),
            cookie: EntryScope::default(),
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        for (name, value) in [
            ("renewal_window_secs", self.renewal_window_secs),
            ("failure_threshold", u64::from(self.failure_threshold)),
            ("cooldown_secs", self.cooldown_secs),
            ("request_timeout_ms", self.request_timeout_ms),
            ("refresh_timeout_ms", self.refresh_timeout_ms),
            ("renewal_check_interval_secs", self.renewal_check_interval_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.safety_margin_secs > self.renewal_window_secs {
            return Err(common::Error::Config(format!(
                "safety_margin_secs ({}) must not exceed renewal_window_secs ({})",
                self.safety_margin_secs, self.renewal_window_secs
            )));
        }

        for path in [&self.sign_in_path, &self.refresh_path]
            .into_iter()
            .chain(&self.gate_exempt_paths)
        {
            if !path.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "endpoint paths must start with '/', got: {path}"
                )));
            }
        }

        if let StorageConfig::File { path } = &self.storage
            && path.as_os_str().is_empty()
        {
            return Err(common::Error::Config("storage.path must not be empty".into()));
        }

        Ok(())
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            renewal_window: Duration::from_secs(self.renewal_window_secs),
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            refresh_timeout: Duration::from_millis(self.refresh_timeout_ms),
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            sign_in_path: self.sign_in_path.clone(),
            refresh_path: self.refresh_path.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn renewal_check_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_check_interval_secs)
    }
}
