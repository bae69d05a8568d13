// src/main.rs

//! # Issuance Server - Main Entry Point
//!
//! Loads configuration, creates keys for the configured issuers and starts
//! the API server together with the session eviction task.
//!
//! ## Configuration Sources
//! - `.env`: Loaded into the environment first
//! - `issuer.toml`: (Optional) Server settings and issuers
//! - `ISSUER_*`: Environment overrides, e.g. `ISSUER_BIND_ADDRESS=0.0.0.0:8088`
//! - `RUST_LOG`: (Optional) Log filter (default: info)

use anyhow::Context;
use dotenv::dotenv;
use issuance_server::config::ServerConfig;
use issuance_server::keystore::{DescriptionStore, IssuerKeyStore};
use issuance_server::services::api_server::ApiServer;
use issuance_server::services::issuance_orchestrator::IssuanceOrchestrator;
use issuance_server::storage::session_store::{spawn_reaper, SessionStore};
use issuance_server::zkp::ecdsa_engine::EcdsaSigningEngine;
use std::net::SocketAddr;
use std::sync::Arc;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment and configuration
/// 2. Register issuers and generate their keys
/// 3. Start the session eviction task
/// 4. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::load("issuer").context("failed to load configuration")?;
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;

    let directory = DescriptionStore::new();
    let keys = IssuerKeyStore::new();
    for issuer in &config.issuers {
        directory.insert(issuer.description())?;
        keys.generate_key(&issuer.name, issuer.key_counter)?;
        log::info!(
            "Registered issuer {} (key counter {}, {} credential types)",
            issuer.name,
            issuer.key_counter,
            issuer.credentials.len()
        );
    }
    if config.issuers.is_empty() {
        log::warn!("No issuers configured; every issuance request will be rejected");
    }

    let store = Arc::new(SessionStore::new());
    let _reaper = spawn_reaper(Arc::clone(&store), config.reaper_interval());

    let orchestrator = IssuanceOrchestrator::new(
        store,
        Arc::new(directory),
        Arc::new(keys),
        Arc::new(EcdsaSigningEngine::new()),
        &config,
    );

    ApiServer::new(Arc::new(orchestrator))
        .run(addr)
        .await
        .context("API server stopped")
}
