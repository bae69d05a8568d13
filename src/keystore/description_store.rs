// src/keystore/description_store.rs
//! In-memory store of issuer descriptions.

use crate::error::{IssueError, IssueResult};
use crate::keystore::IssuerDirectory;
use crate::models::issuer::IssuerDescription;
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe map from issuer name to [`IssuerDescription`].
#[derive(Default)]
pub struct DescriptionStore {
    issuers: RwLock<HashMap<String, IssuerDescription>>,
}

impl DescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `descriptions`.
    pub fn with_issuers(descriptions: impl IntoIterator<Item = IssuerDescription>) -> Self {
        let issuers = descriptions
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        DescriptionStore {
            issuers: RwLock::new(issuers),
        }
    }

    /// Adds or replaces an issuer description.
    pub fn insert(&self, description: IssuerDescription) -> IssueResult<()> {
        let mut issuers = self
            .issuers
            .write()
            .map_err(|_| IssueError::Internal("description store lock poisoned".into()))?;
        issuers.insert(description.name.clone(), description);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.issuers.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IssuerDirectory for DescriptionStore {
    fn issuer_description(&self, name: &str) -> IssueResult<IssuerDescription> {
        let issuers = self
            .issuers
            .read()
            .map_err(|_| IssueError::Internal("description store lock poisoned".into()))?;
        issuers
            .get(name)
            .cloned()
            .ok_or_else(|| IssueError::UnknownIssuer(name.to_string()))
    }
}
