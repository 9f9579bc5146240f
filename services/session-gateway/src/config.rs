//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The startup sign-in password is loaded from GATEWAY_PASSWORD or
//! password_file, never stored in the TOML directly to avoid leaking secrets.

use client::ClientConfig;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub client: ClientConfig,
}

/// Listener settings and the optional startup sign-in
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Account to sign in with at startup when no session is stored
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to GATEWAY_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl GatewayConfig {
    /// Username and password for the startup sign-in, when both are known.
    pub fn startup_credentials(&self) -> Option<(&str, &Secret<String>)> {
        Some((self.username.as_deref()?, self.password.as_ref()?))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. GATEWAY_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.client.validate()?;

        if config.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.gateway.max_body_bytes == 0 {
            return Err(common::Error::Config(
                "max_body_bytes must be greater than 0".into(),
            ));
        }

        if let Ok(password) = std::env::var("GATEWAY_PASSWORD") {
            config.gateway.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.gateway.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.gateway.password = Some(Secret::new(password));
            }
        }

        if config.gateway.password.is_some() && config.gateway.username.is_none() {
            return Err(common::Error::Config(
                "a password is configured but gateway.username is missing".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-gateway.toml")
    }
}
