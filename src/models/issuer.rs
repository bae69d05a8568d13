// src/models/issuer.rs
//! Issuer metadata: descriptions of what an issuer can issue and its keys.

use serde::{Deserialize, Serialize};

/// Description of one credential type an issuer can sign.
///
/// The attribute list is ordered: it fixes the layout of the numeric
/// attribute vector handed to the signing engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescription {
    /// Credential type identifier, unique within its issuer (e.g. "address")
    pub id: String,

    /// Attribute names in signing order
    pub attributes: Vec<String>,
}

/// Everything the server knows about an issuer, apart from its keys.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuerDescription {
    /// Issuer identifier, e.g. "MijnOverheid"
    pub name: String,

    /// Credential types this issuer signs
    #[serde(default)]
    pub credentials: Vec<CredentialDescription>,
}

impl IssuerDescription {
    /// Looks up one of this issuer's credential types by id.
    pub fn credential(&self, id: &str) -> Option<&CredentialDescription> {
        self.credentials.iter().find(|c| c.id == id)
    }
}

/// Public half of an issuer key, identified by issuer name and key counter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuerPublicKey {
    pub issuer: String,
    pub counter: u32,

    /// SEC1-encoded public key bytes
    #[serde(with = "crate::utils::serialization::base64_bytes")]
    pub key: Vec<u8>,
}
