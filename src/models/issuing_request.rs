// src/models/issuing_request.rs
//! Issuer-side issuance requests.
//!
//! An [`IdentityProviderRequest`] is what an issuer backend posts to open a
//! session. It wraps the [`IssuingRequest`], which is also what the client
//! fetches once it connects.

use crate::error::{IssueError, IssueResult};
use crate::models::issuer::CredentialDescription;
use crate::utils::crypto::hash_data;
use crate::utils::serialization::option_biguint_decimal;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size of the session nonce in bits.
pub const NONCE_BITS: u64 = 80;

/// Size of the session context in bits.
pub const CONTEXT_BITS: u64 = 256;

/// Version byte written at the start of the metadata attribute.
pub const METADATA_VERSION: u8 = 0x02;

/// One credential the issuer wants signed for the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Name of the issuer that signs the credential
    pub issuer: String,

    /// Credential type, as declared in the issuer's description
    pub credential: String,

    /// Which of the issuer's public keys to sign with
    #[serde(default)]
    pub key_counter: u32,

    /// Expiry as unix seconds; the validator fills in a default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<i64>,

    /// Attribute name to value
    pub attributes: BTreeMap<String, String>,
}

impl CredentialRequest {
    /// Encodes this credential as the fixed-size numeric vector the signing
    /// engine expects.
    ///
    /// The first element is the metadata attribute (version, validity, key
    /// counter, credential type hash). It is followed by one element per
    /// attribute declared in `description`, in declaration order. Present
    /// values are shifted left by one and tagged with a low bit of 1, so an
    /// empty string still encodes to a non-zero value.
    ///
    /// # Errors
    /// `InvalidRequest` if validity is unset or a declared attribute is missing.
    pub fn to_attribute_vector(
        &self,
        description: &CredentialDescription,
    ) -> IssueResult<Vec<BigUint>> {
        let validity = self.validity.ok_or_else(|| {
            IssueError::InvalidRequest(format!("no validity set for {}", self.credential))
        })?;

        let mut vector = Vec::with_capacity(description.attributes.len() + 1);
        vector.push(self.metadata_attribute(validity));

        for name in &description.attributes {
            let value = self.attributes.get(name).ok_or_else(|| {
                IssueError::InvalidRequest(format!(
                    "attribute {} missing for {}",
                    name, self.credential
                ))
            })?;
            let encoded = BigUint::from_bytes_be(value.as_bytes());
            vector.push((encoded << 1u32) + 1u32);
        }

        Ok(vector)
    }

    fn metadata_attribute(&self, validity: i64) -> BigUint {
        let type_id = format!("{}.{}", self.issuer, self.credential);
        let type_hash = hash_data(type_id.as_bytes());

        let mut bytes = Vec::with_capacity(1 + 8 + 4 + 16);
        bytes.push(METADATA_VERSION);
        bytes.extend_from_slice(&validity.to_be_bytes());
        bytes.extend_from_slice(&self.key_counter.to_be_bytes());
        bytes.extend_from_slice(&type_hash[..16]);
        BigUint::from_bytes_be(&bytes)
    }
}

/// The full specification of what is to be issued in one session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuingRequest {
    /// Credentials to issue, in signing order
    #[serde(default)]
    pub credentials: Vec<CredentialRequest>,

    #[serde(
        default,
        with = "option_biguint_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce: Option<BigUint>,

    #[serde(
        default,
        with = "option_biguint_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<BigUint>,
}

impl IssuingRequest {
    pub fn new(credentials: Vec<CredentialRequest>) -> Self {
        IssuingRequest {
            credentials,
            nonce: None,
            context: None,
        }
    }

    /// Assigns a fresh nonce and context.
    ///
    /// The pair is shared by every credential of the session and may only be
    /// set once.
    ///
    /// # Errors
    /// `InvalidRequest` if either value is already present.
    pub fn set_nonce_and_context(&mut self) -> IssueResult<()> {
        if self.nonce.is_some() || self.context.is_some() {
            return Err(IssueError::InvalidRequest(
                "nonce and context are assigned by the server".into(),
            ));
        }
        let mut rng = OsRng;
        self.nonce = Some(rng.gen_biguint(NONCE_BITS));
        self.context = Some(rng.gen_biguint(CONTEXT_BITS));
        Ok(())
    }
}

/// Envelope posted by an issuer backend to open an issuance session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentityProviderRequest {
    pub request: Option<IssuingRequest>,

    /// Session inactivity timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Free-form data for the issuer's own bookkeeping, kept on the session
    #[serde(default)]
    pub data: Option<String>,
}

/// Response to session creation: everything a client needs to connect.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientQr {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub token: String,
}
