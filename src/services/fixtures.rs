// src/services/fixtures.rs
//! Shared test setup: two issuers, their keys and commitments that the
//! reference engine accepts.

use crate::config::ServerConfig;
use crate::keystore::{DescriptionStore, IssuerKeyStore, SigningKeyStore};
use crate::models::issuer::{CredentialDescription, IssuerDescription};
use crate::models::issuing_request::{CredentialRequest, IdentityProviderRequest, IssuingRequest};
use crate::models::messages::{CommitmentMessage, Proof, ProofKind, ProofList};
use crate::services::issuance_orchestrator::IssuanceOrchestrator;
use crate::storage::session_store::SessionStore;
use crate::zkp::ecdsa_engine::{binding_response, EcdsaSigningEngine};
use crate::zkp::signing_engine::SigningEngine;
use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn directory() -> DescriptionStore {
    DescriptionStore::with_issuers(vec![
        IssuerDescription {
            name: "IssuerA".into(),
            credentials: vec![CredentialDescription {
                id: "membership".into(),
                attributes: vec!["level".into()],
            }],
        },
        IssuerDescription {
            name: "IssuerB".into(),
            credentials: vec![CredentialDescription {
                id: "address".into(),
                attributes: vec!["street".into(), "city".into()],
            }],
        },
    ])
}

pub fn keys() -> Arc<IssuerKeyStore> {
    let keys = IssuerKeyStore::new();
    keys.generate_key("IssuerA", 0).unwrap();
    keys.generate_key("IssuerB", 0).unwrap();
    Arc::new(keys)
}

pub fn orchestrator() -> (IssuanceOrchestrator, Arc<IssuerKeyStore>) {
    orchestrator_with_engine(Arc::new(EcdsaSigningEngine::new()), ServerConfig::default())
}

pub fn orchestrator_with_engine(
    engine: Arc<dyn SigningEngine>,
    config: ServerConfig,
) -> (IssuanceOrchestrator, Arc<IssuerKeyStore>) {
    let keys = keys();
    let orchestrator = IssuanceOrchestrator::new(
        Arc::new(SessionStore::new()),
        Arc::new(directory()),
        keys.clone(),
        engine,
        &config,
    );
    (orchestrator, keys)
}

pub fn issuer_a_and_b_request() -> IdentityProviderRequest {
    let mut membership = BTreeMap::new();
    membership.insert("level".to_string(), "gold".to_string());
    let mut address = BTreeMap::new();
    address.insert("street".to_string(), "Toernooiveld 212".to_string());
    address.insert("city".to_string(), "Nijmegen".to_string());

    IdentityProviderRequest {
        request: Some(IssuingRequest::new(vec![
            CredentialRequest {
                issuer: "IssuerA".into(),
                credential: "membership".into(),
                key_counter: 0,
                validity: None,
                attributes: membership,
            },
            CredentialRequest {
                issuer: "IssuerB".into(),
                credential: "address".into(),
                key_counter: 0,
                validity: None,
                attributes: address,
            },
        ])),
        timeout: None,
        data: Some("order-17".into()),
    }
}

fn bound_proof(
    keys: &IssuerKeyStore,
    request: &IssuingRequest,
    kind: ProofKind,
    issuer: &str,
    commitment: Vec<u8>,
) -> Proof {
    let key = keys.public_key(issuer, 0).unwrap();
    let response = binding_response(
        &key,
        request.context.as_ref().unwrap(),
        request.nonce.as_ref().unwrap(),
        &commitment,
    );
    Proof::new(kind, commitment, response)
}

/// One issuance proof per credential, bound to the request's nonce and
/// context.
pub fn valid_commitment(keys: &IssuerKeyStore, request: &IssuingRequest) -> CommitmentMessage {
    let proofs = request
        .credentials
        .iter()
        .enumerate()
        .map(|(i, credential)| {
            bound_proof(
                keys,
                request,
                ProofKind::Issuance,
                &credential.issuer,
                format!("commitment-{}", i).into_bytes(),
            )
        })
        .collect();
    CommitmentMessage {
        combined_proofs: ProofList::new(proofs),
        n_2: BigUint::from(42u32),
    }
}

pub fn disclosure_proof(keys: &IssuerKeyStore, request: &IssuingRequest, issuer: &str) -> Proof {
    bound_proof(
        keys,
        request,
        ProofKind::Disclosure {
            issuer: issuer.to_string(),
            key_counter: 0,
        },
        issuer,
        b"disclosed".to_vec(),
    )
}
