// src/lib.rs

//! # Issuance Server
//!
//! Server side of an attribute-based credential issuance protocol. An issuer
//! backend opens a session, a client connects with the session token and
//! fetches the request, then submits its commitments and receives one
//! signature per credential.
//!
//! ## Architecture Overview
//! 1. **Services Layer**: Session state machine, request validation, protocol orchestration and HTTP API
//! 2. **Storage Layer**: Concurrent, expiring session store
//! 3. **Key Layer**: Issuer descriptions and signing keys
//! 4. **Signing Layer**: Pluggable signing engine

// Module declarations (organized by functional domain)
pub mod config;    // Server configuration
pub mod error;     // Error type and HTTP mapping
pub mod keystore;  // Issuer descriptions and keys
pub mod models;    // Wire data structures
pub mod services;  // Business logic and API
pub mod storage;   // Session storage
pub mod utils;     // Helper functions
pub mod zkp;       // Signing engine seam
