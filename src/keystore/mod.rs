// src/keystore/mod.rs
//! Issuer metadata and key lookup.
//!
//! The session protocol only depends on the two traits below. The in-memory
//! implementations back the server binary and the tests.

pub mod description_store;
pub mod key_management;

use crate::error::IssueResult;
use crate::models::issuer::{IssuerDescription, IssuerPublicKey};

pub use description_store::DescriptionStore;
pub use key_management::{IssuerKeyStore, IssuerSecretKey};

/// Resolves issuer names to their descriptions.
pub trait IssuerDirectory: Send + Sync {
    /// # Errors
    /// `UnknownIssuer` if the issuer is not known.
    fn issuer_description(&self, name: &str) -> IssueResult<IssuerDescription>;
}

/// Resolves issuer keys.
pub trait SigningKeyStore: Send + Sync {
    /// # Errors
    /// `MissingSigningKey` if no key exists for `issuer` at `counter`.
    fn public_key(&self, issuer: &str, counter: u32) -> IssueResult<IssuerPublicKey>;

    /// # Errors
    /// `MissingSigningKey` if this server cannot sign for the issuer.
    fn secret_key(
        &self,
        description: &IssuerDescription,
        counter: u32,
    ) -> IssueResult<IssuerSecretKey>;
}
