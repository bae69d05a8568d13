// src/keystore/key_management.rs
//! Issuer key management.
//!
//! Holds the secp256k1 key pairs the reference signing engine signs with,
//! indexed by issuer name and key counter.
//!
//! Uses the following cryptographic primitives:
//! - secp256k1 curve (via `k256` crate)
//! - Cryptographically secure random number generation (OS RNG)

use crate::error::{IssueError, IssueResult};
use crate::keystore::SigningKeyStore;
use crate::models::issuer::{IssuerDescription, IssuerPublicKey};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use k256::SecretKey;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Secret half of an issuer key.
///
/// Cloning shares the key material; `Debug` never prints it.
#[derive(Clone)]
pub struct IssuerSecretKey {
    issuer: String,
    counter: u32,
    secret_key: Arc<SecretKey>,
}

impl IssuerSecretKey {
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Derives the public key matching this secret key.
    pub fn public_key(&self) -> IssuerPublicKey {
        IssuerPublicKey {
            issuer: self.issuer.clone(),
            counter: self.counter,
            key: self.secret_key.public_key().to_sec1_bytes().to_vec(),
        }
    }

    /// Signs a 32-byte digest with ECDSA (secp256k1).
    ///
    /// # Returns
    /// 64-byte compact ECDSA signature (R || S values)
    ///
    /// # Errors
    /// `Signing` if the digest cannot be signed.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> IssueResult<Vec<u8>> {
        let signing_key = SigningKey::from(self.secret_key.as_ref());
        let signature: Signature = signing_key
            .sign_prehash(hash)
            .map_err(|e| IssueError::Signing(format!("ECDSA signing failed: {}", e)))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl fmt::Debug for IssuerSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerSecretKey")
            .field("issuer", &self.issuer)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// In-memory, thread-safe issuer key store.
///
/// # Security Notes
/// - Secret keys are never serialized or logged
/// - Keys live only as long as the process; restart means new keys
#[derive(Default)]
pub struct IssuerKeyStore {
    keys: RwLock<HashMap<(String, u32), Arc<SecretKey>>>,
}

impl IssuerKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh key pair for `issuer` at `counter`, replacing any
    /// existing one.
    ///
    /// # Returns
    /// The public key of the new pair.
    pub fn generate_key(&self, issuer: &str, counter: u32) -> IssueResult<IssuerPublicKey> {
        let secret_key = SecretKey::random(&mut OsRng);
        self.insert_key(issuer, counter, secret_key)
    }

    /// Stores an existing secret key for `issuer` at `counter`.
    pub fn insert_key(
        &self,
        issuer: &str,
        counter: u32,
        secret_key: SecretKey,
    ) -> IssueResult<IssuerPublicKey> {
        let public_key = IssuerPublicKey {
            issuer: issuer.to_string(),
            counter,
            key: secret_key.public_key().to_sec1_bytes().to_vec(),
        };
        let mut keys = self
            .keys
            .write()
            .map_err(|_| IssueError::Internal("key store lock poisoned".into()))?;
        keys.insert((issuer.to_string(), counter), Arc::new(secret_key));
        Ok(public_key)
    }

    /// Removes a key. Returns true if a key was removed.
    pub fn remove_key(&self, issuer: &str, counter: u32) -> bool {
        match self.keys.write() {
            Ok(mut keys) => keys.remove(&(issuer.to_string(), counter)).is_some(),
            Err(_) => false,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    fn lookup(&self, issuer: &str, counter: u32) -> IssueResult<Arc<SecretKey>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| IssueError::Internal("key store lock poisoned".into()))?;
        keys.get(&(issuer.to_string(), counter))
            .cloned()
            .ok_or_else(|| IssueError::MissingSigningKey {
                issuer: issuer.to_string(),
                counter,
            })
    }
}

impl SigningKeyStore for IssuerKeyStore {
    fn public_key(&self, issuer: &str, counter: u32) -> IssueResult<IssuerPublicKey> {
        let secret_key = self.lookup(issuer, counter)?;
        Ok(IssuerPublicKey {
            issuer: issuer.to_string(),
            counter,
            key: secret_key.public_key().to_sec1_bytes().to_vec(),
        })
    }

    fn secret_key(
        &self,
        description: &IssuerDescription,
        counter: u32,
    ) -> IssueResult<IssuerSecretKey> {
        let secret_key = self.lookup(&description.name, counter)?;
        Ok(IssuerSecretKey {
            issuer: description.name.clone(),
            counter,
            secret_key,
        })
    }
}
