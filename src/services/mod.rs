// src/services/mod.rs
pub mod api_server;
pub mod issuance_orchestrator;
pub mod issue_session;
pub mod request_validator;

#[cfg(test)]
pub(crate) mod fixtures;
