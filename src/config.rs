// src/config.rs
//! Server configuration.
//!
//! Values are merged, lowest priority first, from:
//! 1. Built-in defaults (the `default_*` functions below)
//! 2. An optional config file (`issuer.toml` unless overridden)
//! 3. `ISSUER_*` environment variables, e.g. `ISSUER_SESSION_TTL_SECS=600`
//!
//! `.env` files are loaded by `main` before this runs.

use crate::models::issuer::{CredentialDescription, IssuerDescription};
use serde::{Deserialize, Serialize};

/// Issuer the server can sign for, with the credential types it issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    pub name: String,

    /// Counter of the key generated for this issuer at startup
    #[serde(default)]
    pub key_counter: u32,

    #[serde(default)]
    pub credentials: Vec<CredentialDescription>,
}

impl IssuerConfig {
    pub fn description(&self) -> IssuerDescription {
        IssuerDescription {
            name: self.name.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Inactivity timeout of a session that is not done yet.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Upper bound for timeouts requested by issuers.
    #[serde(default = "default_max_session_ttl")]
    pub max_session_ttl_secs: u64,

    /// How long a done session answers status queries.
    #[serde(default = "default_done_retention")]
    pub done_retention_secs: u64,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Bound on one complete signing run for a commitment.
    #[serde(default = "default_signing_timeout")]
    pub signing_timeout_ms: u64,

    /// Failed commitment submissions allowed per session before it is dropped.
    #[serde(default = "default_max_commitment_attempts")]
    pub max_commitment_attempts: u32,

    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,
}

fn default_bind_address() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_session_ttl() -> u64 {
    300
}

fn default_max_session_ttl() -> u64 {
    3600
}

fn default_done_retention() -> u64 {
    60
}

fn default_reaper_interval() -> u64 {
    30
}

fn default_signing_timeout() -> u64 {
    10_000
}

fn default_max_commitment_attempts() -> u32 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            session_ttl_secs: default_session_ttl(),
            max_session_ttl_secs: default_max_session_ttl(),
            done_retention_secs: default_done_retention(),
            reaper_interval_secs: default_reaper_interval(),
            signing_timeout_ms: default_signing_timeout(),
            max_commitment_attempts: default_max_commitment_attempts(),
            issuers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `file` (optional, any format the `config`
    /// crate recognises by extension) and the `ISSUER_*` environment.
    pub fn load(file: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("ISSUER").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            default_ttl: chrono::Duration::seconds(self.session_ttl_secs as i64),
            max_ttl: chrono::Duration::seconds(self.max_session_ttl_secs as i64),
            done_retention: chrono::Duration::seconds(self.done_retention_secs as i64),
        }
    }

    pub fn signing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.signing_timeout_ms)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

/// Session lifetime rules derived from [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub default_ttl: chrono::Duration,
    pub max_ttl: chrono::Duration,
    pub done_retention: chrono::Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        ServerConfig::default().session_policy()
    }
}

impl SessionPolicy {
    /// Inactivity timeout for a session whose issuer asked for `requested`
    /// seconds: the default when absent or zero, never above the maximum.
    pub fn ttl_for(&self, requested: Option<u64>) -> chrono::Duration {
        match requested {
            Some(secs) if secs > 0 => {
                let secs = secs.min(self.max_ttl.num_seconds().max(0) as u64);
                chrono::Duration::seconds(secs as i64)
            }
            _ => self.default_ttl,
        }
    }
}
