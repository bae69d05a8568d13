// src/services/request_validator.rs
//! Gatekeeper for session creation.
//!
//! A request is checked completely before a session exists: if any credential
//! names an unknown issuer, an undeclared credential type or attribute, or a
//! key this server cannot sign with, nothing is stored.

use crate::config::SessionPolicy;
use crate::error::{IssueError, IssueResult};
use crate::keystore::{IssuerDirectory, SigningKeyStore};
use crate::models::issuing_request::{CredentialRequest, IdentityProviderRequest, IssuingRequest};
use crate::services::issue_session::IssueSession;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Default credential lifetime when the issuer does not set one.
pub const DEFAULT_VALIDITY_DAYS: i64 = 182;

/// Validates issuer requests and turns them into fresh sessions.
pub struct RequestValidator {
    directory: Arc<dyn IssuerDirectory>,
    keys: Arc<dyn SigningKeyStore>,
    policy: SessionPolicy,
}

impl RequestValidator {
    pub fn new(
        directory: Arc<dyn IssuerDirectory>,
        keys: Arc<dyn SigningKeyStore>,
        policy: SessionPolicy,
    ) -> Self {
        RequestValidator {
            directory,
            keys,
            policy,
        }
    }

    /// Validates `ip_request` and builds an `INITIALIZED` session for it.
    ///
    /// # Arguments
    /// * `token` - Freshly generated session token
    /// * `ip_request` - Request as posted by the issuer backend
    ///
    /// # Errors
    /// - `InvalidRequest` for a missing or empty request, unknown credential
    ///   types or attributes, or an expired validity
    /// - `UnknownIssuer` / `MissingSigningKey` if a key cannot be resolved
    pub fn prepare_session(
        &self,
        token: String,
        ip_request: IdentityProviderRequest,
    ) -> IssueResult<IssueSession> {
        let request = ip_request
            .request
            .ok_or_else(|| IssueError::InvalidRequest("Incomplete request".into()))?;
        let request = self.validate(request)?;
        let ttl = self.policy.ttl_for(ip_request.timeout);

        Ok(IssueSession::new(
            token,
            request,
            ttl,
            self.policy.done_retention,
        )
        .with_data(ip_request.data))
    }

    /// Checks every credential of `request`, fills in default validities and
    /// assigns the nonce and context.
    ///
    /// A nonce or context sent by the issuer is discarded.
    pub fn validate(&self, mut request: IssuingRequest) -> IssueResult<IssuingRequest> {
        if request.credentials.is_empty() {
            return Err(IssueError::InvalidRequest("Incomplete request".into()));
        }
        let supplied_nonce = request.nonce.take();
        let supplied_context = request.context.take();
        if supplied_nonce.is_some() || supplied_context.is_some() {
            log::debug!("Ignoring nonce/context supplied with issuance request");
        }

        for credential in request.credentials.iter_mut() {
            self.check_credential(credential)?;
        }

        request.set_nonce_and_context()?;
        Ok(request)
    }

    fn check_credential(&self, credential: &mut CredentialRequest) -> IssueResult<()> {
        let description = self.directory.issuer_description(&credential.issuer)?;
        let credential_description = description.credential(&credential.credential).ok_or_else(|| {
            IssueError::InvalidRequest(format!(
                "issuer {} does not issue {}",
                credential.issuer, credential.credential
            ))
        })?;

        if let Some(unknown) = credential
            .attributes
            .keys()
            .find(|name| !credential_description.attributes.contains(*name))
        {
            return Err(IssueError::InvalidRequest(format!(
                "unknown attribute {} for {}",
                unknown, credential.credential
            )));
        }
        if let Some(missing) = credential_description
            .attributes
            .iter()
            .find(|name| !credential.attributes.contains_key(*name))
        {
            return Err(IssueError::InvalidRequest(format!(
                "attribute {} missing for {}",
                missing, credential.credential
            )));
        }

        let now = Utc::now().timestamp();
        match credential.validity {
            Some(validity) if validity <= now => {
                return Err(IssueError::InvalidRequest(format!(
                    "validity of {} lies in the past",
                    credential.credential
                )));
            }
            Some(_) => {}
            None => {
                credential.validity =
                    Some((Utc::now() + Duration::days(DEFAULT_VALIDITY_DAYS)).timestamp());
            }
        }

        self.keys.public_key(&credential.issuer, credential.key_counter)?;
        self.keys.secret_key(&description, credential.key_counter)?;
        Ok(())
    }
}
