// src/zkp/signing_engine.rs
//! Boundary to the cryptographic signing engine.
//!
//! The engine constructs one signature per credential. Verifying the client's
//! proofs is an indivisible part of that construction: the session layer only
//! checks structure (counts, key attachment, ordering) and never inspects a
//! proof itself.

use crate::error::IssueError;
use crate::keystore::IssuerSecretKey;
use crate::models::issuer::IssuerPublicKey;
use crate::models::issuing_request::CredentialRequest;
use crate::models::messages::{CommitmentMessage, SignatureMessage};
use num_bigint::BigUint;
use thiserror::Error;

/// Failures reported by a signing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A proof in the combined list did not verify.
    #[error("{0}")]
    ProofVerification(String),

    /// Proofs verified but the signature could not be produced.
    #[error("{0}")]
    Signing(String),
}

impl From<EngineError> for IssueError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ProofVerification(msg) => IssueError::ProofVerification(msg),
            EngineError::Signing(msg) => IssueError::Signing(msg),
        }
    }
}

/// Issuer material for one credential.
#[derive(Debug, Clone)]
pub struct IssuerContext {
    pub public_key: IssuerPublicKey,
    pub secret_key: IssuerSecretKey,

    /// Session context shared by every credential of the session
    pub context: BigUint,
}

/// Everything needed to sign credential `index` of a session.
#[derive(Debug, Clone, Copy)]
pub struct SignatureRequest<'a> {
    /// Commitment with every public key already attached
    pub commitments: &'a CommitmentMessage,
    pub credential: &'a CredentialRequest,

    /// Fixed-size attribute vector, metadata attribute first
    pub attributes: &'a [BigUint],
    pub index: usize,
    pub nonce: &'a BigUint,
}

/// Constructs credential signatures, verifying the commitment's proofs as a
/// side effect.
///
/// Implementations must be callable from a blocking thread and may be slow.
pub trait SigningEngine: Send + Sync {
    fn issue_signature(
        &self,
        issuer: &IssuerContext,
        request: &SignatureRequest<'_>,
    ) -> Result<SignatureMessage, EngineError>;
}
