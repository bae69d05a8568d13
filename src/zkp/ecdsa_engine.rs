// src/zkp/ecdsa_engine.rs
//! Reference signing engine for development and tests.
//!
//! This engine is NOT zero-knowledge and NOT blind. It keeps the contract of
//! a real engine (verify every proof, then sign credential `i`) with simple
//! primitives:
//! - A proof verifies when its response equals the hash binding of the
//!   attached public key, the session context and nonce, and the proof's
//!   commitment (see [`binding_response`]).
//! - The signature is an ECDSA (secp256k1) signature over a SHA-256 digest of
//!   the context, nonce, client nonce, credential index, issuance commitment
//!   and attribute vector.

use crate::models::issuer::IssuerPublicKey;
use crate::models::messages::{Proof, ProofKind, SignatureMessage};
use crate::utils::crypto::hash_parts;
use crate::zkp::signing_engine::{EngineError, IssuerContext, SignatureRequest, SigningEngine};
use num_bigint::BigUint;

/// Computes the response a proof must carry to verify under this engine.
///
/// # Arguments
/// * `public_key` - Issuer key the proof is bound to
/// * `context` - Session context from the fetched issuing request
/// * `nonce` - Session nonce from the fetched issuing request
/// * `commitment` - The proof's commitment payload
pub fn binding_response(
    public_key: &IssuerPublicKey,
    context: &BigUint,
    nonce: &BigUint,
    commitment: &[u8],
) -> Vec<u8> {
    let counter = public_key.counter.to_be_bytes();
    let context = context.to_bytes_be();
    let nonce = nonce.to_bytes_be();
    hash_parts(&[
        public_key.issuer.as_bytes(),
        &counter[..],
        public_key.key.as_slice(),
        context.as_slice(),
        nonce.as_slice(),
        commitment,
    ])
    .to_vec()
}

/// Signing engine backed by the issuer's secp256k1 key.
#[derive(Debug, Default, Clone)]
pub struct EcdsaSigningEngine;

impl EcdsaSigningEngine {
    pub fn new() -> Self {
        EcdsaSigningEngine
    }

    fn verify_proof(
        index: usize,
        proof: &Proof,
        context: &BigUint,
        nonce: &BigUint,
    ) -> Result<(), EngineError> {
        let public_key = proof.public_key().ok_or_else(|| {
            EngineError::ProofVerification(format!("proof {} has no public key attached", index))
        })?;

        if let ProofKind::Disclosure { issuer, key_counter } = &proof.kind {
            if issuer != &public_key.issuer || *key_counter != public_key.counter {
                return Err(EngineError::ProofVerification(format!(
                    "proof {} is bound to the wrong key",
                    index
                )));
            }
        }

        let expected = binding_response(public_key, context, nonce, &proof.commitment);
        if expected != proof.response {
            return Err(EngineError::ProofVerification(format!(
                "proof {} does not verify",
                index
            )));
        }
        Ok(())
    }
}

impl SigningEngine for EcdsaSigningEngine {
    fn issue_signature(
        &self,
        issuer: &IssuerContext,
        request: &SignatureRequest<'_>,
    ) -> Result<SignatureMessage, EngineError> {
        let proofs = &request.commitments.combined_proofs;

        // Every proof is checked on every call; the proofs are bound together
        // through the shared nonce and context.
        for (i, proof) in proofs.iter().enumerate() {
            Self::verify_proof(i, proof, &issuer.context, request.nonce)?;
        }

        let own = proofs.get(request.index).ok_or_else(|| {
            EngineError::ProofVerification(format!("no proof for credential {}", request.index))
        })?;
        if own.kind != ProofKind::Issuance {
            return Err(EngineError::ProofVerification(format!(
                "proof {} is not an issuance proof",
                request.index
            )));
        }
        if own.public_key() != Some(&issuer.public_key) {
            return Err(EngineError::ProofVerification(format!(
                "proof {} is bound to the wrong issuer key",
                request.index
            )));
        }
        if issuer.secret_key.public_key() != issuer.public_key {
            return Err(EngineError::Signing(format!(
                "secret key does not match public key of {}",
                issuer.public_key.issuer
            )));
        }

        let context = issuer.context.to_bytes_be();
        let nonce = request.nonce.to_bytes_be();
        let n_2 = request.commitments.n_2.to_bytes_be();
        let index = (request.index as u64).to_be_bytes();
        let attributes: Vec<Vec<u8>> = request.attributes.iter().map(|a| a.to_bytes_be()).collect();

        let mut parts: Vec<&[u8]> = vec![
            context.as_slice(),
            nonce.as_slice(),
            n_2.as_slice(),
            &index[..],
            own.commitment.as_slice(),
        ];
        parts.extend(attributes.iter().map(|a| a.as_slice()));
        let digest = hash_parts(&parts);

        let signature = issuer
            .secret_key
            .sign_prehash(&digest)
            .map_err(|e| EngineError::Signing(e.to_string()))?;

        Ok(SignatureMessage {
            index: request.index,
            issuer: issuer.public_key.issuer.clone(),
            credential: request.credential.credential.clone(),
            key_counter: issuer.public_key.counter,
            signature,
        })
    }
}
