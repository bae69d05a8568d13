// src/models/messages.rs
//! Client-side protocol messages: commitments in, signatures out.

use crate::error::{IssueError, IssueResult};
use crate::models::issuer::IssuerPublicKey;
use crate::utils::serialization::{base64_bytes, biguint_decimal};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// What a proof in the combined proof list is about.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    /// Proof accompanying the commitment for a credential being issued.
    /// Its position in the list is the index of that credential.
    Issuance,

    /// Proof of possession of an already-held credential.
    Disclosure { issuer: String, key_counter: u32 },
}

/// A single proof from the client. The payloads are opaque to the server;
/// only the signing engine interprets them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Proof {
    pub kind: ProofKind,

    #[serde(with = "base64_bytes")]
    pub commitment: Vec<u8>,

    #[serde(with = "base64_bytes")]
    pub response: Vec<u8>,

    /// Attached server-side; never read from the wire
    #[serde(skip)]
    public_key: Option<IssuerPublicKey>,
}

impl Proof {
    pub fn new(kind: ProofKind, commitment: Vec<u8>, response: Vec<u8>) -> Self {
        Proof {
            kind,
            commitment,
            response,
            public_key: None,
        }
    }

    pub fn public_key(&self) -> Option<&IssuerPublicKey> {
        self.public_key.as_ref()
    }
}

/// The client's combined proof list.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct ProofList(Vec<Proof>);

impl ProofList {
    pub fn new(proofs: Vec<Proof>) -> Self {
        ProofList(proofs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Proof> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proof> {
        self.0.iter()
    }

    /// Attaches `key` to the proof at `index`, replacing any earlier key.
    pub fn set_public_key(&mut self, index: usize, key: IssuerPublicKey) -> IssueResult<()> {
        let proofs = self.0.len();
        let proof = self.0.get_mut(index).ok_or(IssueError::ProofCountMismatch {
            proofs,
            credentials: index + 1,
        })?;
        proof.public_key = Some(key);
        Ok(())
    }

    /// True once every proof in the list carries a public key.
    pub fn all_keys_attached(&self) -> bool {
        self.0.iter().all(|p| p.public_key.is_some())
    }
}

/// Message the client posts in the last protocol round.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommitmentMessage {
    pub combined_proofs: ProofList,

    /// Client nonce for the signature proofs
    #[serde(with = "biguint_decimal")]
    pub n_2: BigUint,
}

/// One signed credential, returned to the client and not retained.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignatureMessage {
    /// Position of the credential in the issuing request
    pub index: usize,
    pub issuer: String,
    pub credential: String,
    pub key_counter: u32,

    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}
