// src/services/issuance_orchestrator.rs
//! Issuance Orchestrator
//!
//! Drives an issuance session through its three protocol calls:
//! - create: validate the issuer's request and store a new session
//! - fetch: hand the request to the client (`INITIALIZED → CONNECTED`)
//! - submit: turn the client's commitment into signatures (`CONNECTED → DONE`)
//!
//! Signing happens in two phases that must not be merged. Phase one attaches
//! the public key of every proof in the combined list. Phase two asks the
//! engine for one signature per credential. The engine verifies all proofs
//! while signing, and that verification needs every key in place, so no
//! signature is requested before phase one has finished for all credentials.

use crate::config::ServerConfig;
use crate::error::{IssueError, IssueResult};
use crate::keystore::{IssuerDirectory, SigningKeyStore};
use crate::models::issuing_request::{ClientQr, IdentityProviderRequest, IssuingRequest};
use crate::models::messages::{CommitmentMessage, ProofKind, SignatureMessage};
use crate::services::issue_session::{IssueSession, IssueStatus, SigningRun};
use crate::services::request_validator::RequestValidator;
use crate::storage::session_store::{SessionHandle, SessionStore};
use crate::utils::token::generate_session_token;
use crate::zkp::signing_engine::{IssuerContext, SignatureRequest, SigningEngine};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

/// Protocol version announced to clients.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Fails unless the commitment has at least one proof per credential.
pub fn check_proof_count(proofs: usize, credentials: usize) -> IssueResult<()> {
    if proofs < credentials {
        return Err(IssueError::ProofCountMismatch { proofs, credentials });
    }
    Ok(())
}

/// The cryptographic half of phase 3, free of any session state.
#[derive(Clone)]
pub struct SigningPipeline {
    directory: Arc<dyn IssuerDirectory>,
    keys: Arc<dyn SigningKeyStore>,
    engine: Arc<dyn SigningEngine>,
}

impl SigningPipeline {
    pub fn new(
        directory: Arc<dyn IssuerDirectory>,
        keys: Arc<dyn SigningKeyStore>,
        engine: Arc<dyn SigningEngine>,
    ) -> Self {
        SigningPipeline {
            directory,
            keys,
            engine,
        }
    }

    /// Produces one signature per credential of `request`, in request order.
    ///
    /// Either every signature is returned or none is. Stops with
    /// `SigningTimeout` once `run` is cancelled.
    pub fn issue_signatures(
        &self,
        request: &IssuingRequest,
        mut commitments: CommitmentMessage,
        run: &SigningRun,
    ) -> IssueResult<Vec<SignatureMessage>> {
        check_proof_count(commitments.combined_proofs.len(), request.credentials.len())?;
        self.attach_public_keys(request, &mut commitments)?;
        self.sign_credentials(request, &commitments, run)
    }

    /// Phase one: resolve and attach the key of every proof.
    ///
    /// Disclosure proofs get the key they name. Proof `i` for `i` below the
    /// credential count gets the key of credential `i`.
    pub fn attach_public_keys(
        &self,
        request: &IssuingRequest,
        commitments: &mut CommitmentMessage,
    ) -> IssueResult<()> {
        let proofs = &mut commitments.combined_proofs;

        for index in 0..proofs.len() {
            let named = match proofs.get(index).map(|p| &p.kind) {
                Some(ProofKind::Disclosure { issuer, key_counter }) => {
                    Some((issuer.clone(), *key_counter))
                }
                _ => None,
            };
            if let Some((issuer, counter)) = named {
                let key = self.keys.public_key(&issuer, counter).map_err(|_| {
                    IssueError::ProofVerification(format!(
                        "proof {} refers to unknown key {} (counter {})",
                        index, issuer, counter
                    ))
                })?;
                proofs.set_public_key(index, key)?;
            }
        }

        for (index, credential) in request.credentials.iter().enumerate() {
            let key = self
                .keys
                .public_key(&credential.issuer, credential.key_counter)?;
            proofs.set_public_key(index, key)?;
        }
        Ok(())
    }

    /// Phase two: one engine call per credential, in request order.
    ///
    /// `run` is checked before every engine call.
    pub fn sign_credentials(
        &self,
        request: &IssuingRequest,
        commitments: &CommitmentMessage,
        run: &SigningRun,
    ) -> IssueResult<Vec<SignatureMessage>> {
        if !commitments.combined_proofs.all_keys_attached() {
            return Err(IssueError::Internal(
                "signing requested before all public keys were attached".into(),
            ));
        }
        let nonce = request
            .nonce
            .as_ref()
            .ok_or_else(|| IssueError::Internal("session has no nonce".into()))?;
        let context = request
            .context
            .as_ref()
            .ok_or_else(|| IssueError::Internal("session has no context".into()))?;

        let mut signatures = Vec::with_capacity(request.credentials.len());
        for (index, credential) in request.credentials.iter().enumerate() {
            if run.is_cancelled() {
                log::warn!("Signing run cancelled before credential {}", index);
                return Err(IssueError::SigningTimeout);
            }
            let description = self.directory.issuer_description(&credential.issuer)?;
            let credential_description =
                description.credential(&credential.credential).ok_or_else(|| {
                    IssueError::InvalidRequest(format!(
                        "issuer {} no longer issues {}",
                        credential.issuer, credential.credential
                    ))
                })?;
            let attributes = credential.to_attribute_vector(credential_description)?;

            let issuer = IssuerContext {
                public_key: self
                    .keys
                    .public_key(&credential.issuer, credential.key_counter)?,
                secret_key: self.keys.secret_key(&description, credential.key_counter)?,
                context: context.clone(),
            };
            let signature_request = SignatureRequest {
                commitments,
                credential,
                attributes: &attributes,
                index,
                nonce,
            };

            let signature = self
                .engine
                .issue_signature(&issuer, &signature_request)
                .map_err(|e| {
                    log::error!("Signing credential {} ({}) failed: {}", index, credential.credential, e);
                    IssueError::from(e)
                })?;
            signatures.push(signature);
        }
        Ok(signatures)
    }
}

/// Runs the issuance protocol on top of an injected session store.
pub struct IssuanceOrchestrator {
    store: Arc<SessionStore<IssueSession>>,
    validator: RequestValidator,
    pipeline: SigningPipeline,
    signing_timeout: Duration,
    max_commitment_attempts: u32,
}

impl IssuanceOrchestrator {
    /// Creates a new orchestrator.
    ///
    /// # Arguments
    /// * `store` - Session store, shared with the eviction task
    /// * `directory` - Issuer description lookup
    /// * `keys` - Issuer key lookup
    /// * `engine` - Signing engine
    /// * `config` - Session lifetimes, signing timeout and attempt bound
    pub fn new(
        store: Arc<SessionStore<IssueSession>>,
        directory: Arc<dyn IssuerDirectory>,
        keys: Arc<dyn SigningKeyStore>,
        engine: Arc<dyn SigningEngine>,
        config: &ServerConfig,
    ) -> Self {
        IssuanceOrchestrator {
            store,
            validator: RequestValidator::new(
                Arc::clone(&directory),
                Arc::clone(&keys),
                config.session_policy(),
            ),
            pipeline: SigningPipeline::new(directory, keys, engine),
            signing_timeout: config.signing_timeout(),
            max_commitment_attempts: config.max_commitment_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore<IssueSession>> {
        &self.store
    }

    /// Validates the issuer's request and opens a session for it.
    ///
    /// # Returns
    /// Protocol version and the token the client connects with
    pub fn create_session(&self, ip_request: IdentityProviderRequest) -> IssueResult<ClientQr> {
        let token = generate_session_token();
        let session = self
            .validator
            .prepare_session(token.clone(), ip_request)
            .map_err(|e| {
                log::warn!("Rejected issuance request: {}", e);
                e
            })?;
        let credentials = session.request().map_or(0, |r| r.credentials.len());
        if let Some(request) = session.request() {
            match serde_json::to_string(request) {
                Ok(json) => log::debug!("Issuance request for {}: {}", token, json),
                Err(e) => log::debug!("Issuance request for {} not printable: {}", token, e),
            }
        }

        if let Some(data) = session.data() {
            log::debug!("Issuer data for {}: {}", token, data);
        }

        self.store.create(session)?;
        log::info!(
            "Received issue session, token: {} ({} credentials)",
            token,
            credentials
        );

        Ok(ClientQr {
            protocol_version: PROTOCOL_VERSION.to_string(),
            token,
        })
    }

    /// Client's first contact: returns the request and marks the session
    /// `CONNECTED`.
    pub fn fetch_request(&self, token: &str) -> IssueResult<IssuingRequest> {
        let handle = self.store.get(token)?;
        let request = Self::lock(&handle)?.connect().map_err(|e| {
            log::warn!("Rejected request fetch for {}: {}", token, e);
            e
        })?;
        log::info!("Received get, token: {}", token);
        Ok(request)
    }

    /// Final protocol round: verifies the commitment's structure, has the
    /// engine sign every credential and marks the session `DONE`.
    ///
    /// On failure the session returns to `CONNECTED` and the client may submit
    /// a new commitment under the same token and nonce, until
    /// `max_commitment_attempts` runs have failed with a non-retryable error;
    /// then the session is dropped.
    ///
    /// A timed-out run is cancelled. Resubmissions get `SigningInProgress`
    /// until its current engine call has returned.
    pub async fn submit_commitments(
        &self,
        token: &str,
        commitments: CommitmentMessage,
    ) -> IssueResult<Vec<SignatureMessage>> {
        let handle = self.store.get(token)?;

        let (request, running) = {
            let mut session = Self::lock(&handle)?;
            if session.status() == IssueStatus::Connected {
                let credentials = session.request().map_or(0, |r| r.credentials.len());
                check_proof_count(commitments.combined_proofs.len(), credentials).map_err(|e| {
                    log::warn!("Rejected commitments for {}: {}", token, e);
                    e
                })?;
            }
            session.begin_processing().map_err(|e| {
                log::warn!("Rejected commitments for {}: {}", token, e);
                e
            })?
        };
        log::info!("Received commitments, token: {}", token);

        // Detached so a dropped caller cannot strand the session in PROCESSING.
        let pipeline = self.pipeline.clone();
        let store = Arc::clone(&self.store);
        let signing_timeout = self.signing_timeout;
        let max_attempts = self.max_commitment_attempts;
        let token = token.to_string();

        let run = running.run().clone();
        let task = tokio::spawn(async move {
            let job = tokio::task::spawn_blocking(move || {
                let outcome = pipeline.issue_signatures(&request, commitments, running.run());
                drop(running);
                outcome
            });
            let outcome = match tokio::time::timeout(signing_timeout, job).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(IssueError::Internal(format!("signing task failed: {}", e))),
                Err(_) => {
                    run.cancel();
                    Err(IssueError::SigningTimeout)
                }
            };
            Self::finish(&store, &handle, &token, outcome, max_attempts)
        });

        task.await
            .map_err(|e| IssueError::Internal(format!("commitment task failed: {}", e)))?
    }

    fn finish(
        store: &SessionStore<IssueSession>,
        handle: &SessionHandle<IssueSession>,
        token: &str,
        outcome: IssueResult<Vec<SignatureMessage>>,
        max_attempts: u32,
    ) -> IssueResult<Vec<SignatureMessage>> {
        let mut session = Self::lock(handle)?;
        match outcome {
            Ok(signatures) => {
                session.complete()?;
                log::info!("Issued {} signatures, token: {}", signatures.len(), token);
                Ok(signatures)
            }
            Err(e) => {
                let exhausted =
                    !e.is_retryable() && session.failed_attempts() + 1 >= max_attempts;
                if exhausted {
                    // Removed while still PROCESSING so no further attempt can start.
                    store.remove(token);
                    log::warn!("Session {} dropped after {} failed attempts", token, max_attempts);
                } else {
                    session.abort(&e)?;
                    log::warn!("Commitments for {} failed: {}", token, e);
                }
                Err(e)
            }
        }
    }

    pub fn session_status(&self, token: &str) -> IssueResult<IssueStatus> {
        let handle = self.store.get(token)?;
        let status = Self::lock(&handle)?.status();
        Ok(status)
    }

    /// Removes a session that is not being signed for.
    pub fn cancel_session(&self, token: &str) -> IssueResult<()> {
        let handle = self.store.get(token)?;
        let session = Self::lock(&handle)?;
        if session.status() == IssueStatus::Processing {
            return Err(IssueError::IllegalSessionState {
                expected: IssueStatus::Connected,
                actual: IssueStatus::Processing,
            });
        }
        self.store.remove(token);
        drop(session);
        log::info!("Session {} cancelled", token);
        Ok(())
    }

    fn lock(handle: &SessionHandle<IssueSession>) -> IssueResult<MutexGuard<'_, IssueSession>> {
        handle
            .lock()
            .map_err(|_| IssueError::Internal("session lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{
        directory, disclosure_proof, issuer_a_and_b_request, orchestrator,
        orchestrator_with_engine, valid_commitment,
    };
    use crate::zkp::ecdsa_engine::EcdsaSigningEngine;
    use crate::zkp::signing_engine::EngineError;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct FailingEngine;

    impl SigningEngine for FailingEngine {
        fn issue_signature(
            &self,
            _issuer: &IssuerContext,
            request: &SignatureRequest<'_>,
        ) -> Result<SignatureMessage, EngineError> {
            Err(EngineError::ProofVerification(format!(
                "proof {} rejected",
                request.index
            )))
        }
    }

    /// Fails every call; the first `slow_calls` calls sleep for `delay`
    /// first. Tracks how many calls overlap.
    struct CountingEngine {
        slow_calls: usize,
        delay: Duration,
        calls: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingEngine {
        fn new(slow_calls: usize, delay: Duration) -> Self {
            CountingEngine {
                slow_calls,
                delay,
                calls: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl SigningEngine for CountingEngine {
        fn issue_signature(
            &self,
            _issuer: &IssuerContext,
            _request: &SignatureRequest<'_>,
        ) -> Result<SignatureMessage, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            if call < self.slow_calls {
                std::thread::sleep(self.delay);
            }
            self.current.fetch_sub(1, Ordering::SeqCst);
            Err(EngineError::Signing(format!("call {} refused", call)))
        }
    }

    struct SlowEngine;

    impl SigningEngine for SlowEngine {
        fn issue_signature(
            &self,
            _issuer: &IssuerContext,
            _request: &SignatureRequest<'_>,
        ) -> Result<SignatureMessage, EngineError> {
            std::thread::sleep(std::time::Duration::from_millis(500));
            Err(EngineError::Signing("too late".into()))
        }
    }

    #[tokio::test]
    async fn test_end_to_end_two_issuers() {
        let (orch, keys) = orchestrator();
        let qr = assert_ok!(orch.create_session(issuer_a_and_b_request()));
        assert_eq!(qr.protocol_version, PROTOCOL_VERSION);
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Initialized);

        let request = assert_ok!(orch.fetch_request(&qr.token));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
        assert_eq!(request.credentials.len(), 2);
        assert_eq!(request.credentials[0].issuer, "IssuerA");
        assert_eq!(request.credentials[1].issuer, "IssuerB");

        let commitments = valid_commitment(&keys, &request);
        let signatures = assert_ok!(orch.submit_commitments(&qr.token, commitments.clone()).await);
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[0].index, 0);
        assert_eq!(signatures[0].issuer, "IssuerA");
        assert_eq!(signatures[1].index, 1);
        assert_eq!(signatures[1].issuer, "IssuerB");
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Done);

        let replay = orch.submit_commitments(&qr.token, commitments).await;
        assert!(matches!(
            replay,
            Err(IssueError::IllegalSessionState { actual: IssueStatus::Done, .. })
        ));
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let (orch, _) = orchestrator();
        let a = orch.create_session(issuer_a_and_b_request()).unwrap();
        let b = orch.create_session(issuer_a_and_b_request()).unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(orch.store().len(), 2);
    }

    #[test]
    fn test_empty_request_creates_nothing() {
        let (orch, _) = orchestrator();
        let ip_request = IdentityProviderRequest {
            request: Some(IssuingRequest::new(vec![])),
            timeout: None,
            data: None,
        };
        assert!(matches!(
            orch.create_session(ip_request),
            Err(IssueError::InvalidRequest(_))
        ));
        assert!(orch.store().is_empty());
    }

    #[test]
    fn test_unknown_token() {
        let (orch, _) = orchestrator();
        assert!(matches!(
            orch.fetch_request("unknown"),
            Err(IssueError::SessionNotFound)
        ));
        assert!(matches!(
            orch.session_status("unknown"),
            Err(IssueError::SessionNotFound)
        ));
    }

    #[test]
    fn test_expired_session_not_found() {
        let (orch, _) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        orch.store()
            .get(&qr.token)
            .unwrap()
            .lock()
            .unwrap()
            .force_expire();

        assert!(matches!(
            orch.fetch_request(&qr.token),
            Err(IssueError::SessionNotFound)
        ));
        assert!(orch.store().is_empty());
    }

    #[test]
    fn test_double_fetch_rejected() {
        let (orch, _) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        assert_ok!(orch.fetch_request(&qr.token));
        assert!(matches!(
            orch.fetch_request(&qr.token),
            Err(IssueError::IllegalSessionState { .. })
        ));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
    }

    #[tokio::test]
    async fn test_submit_before_fetch_rejected() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch
            .store()
            .get(&qr.token)
            .unwrap()
            .lock()
            .unwrap()
            .request()
            .cloned()
            .unwrap();

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(
            result,
            Err(IssueError::IllegalSessionState {
                expected: IssueStatus::Connected,
                actual: IssueStatus::Initialized
            })
        ));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Initialized);
    }

    #[tokio::test]
    async fn test_short_proof_list_leaves_session_connected() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let mut commitments = valid_commitment(&keys, &request);
        let first = commitments.combined_proofs.get(0).cloned().unwrap();
        commitments.combined_proofs = crate::models::messages::ProofList::new(vec![first]);

        let result = orch.submit_commitments(&qr.token, commitments).await;
        assert!(matches!(
            result,
            Err(IssueError::ProofCountMismatch { proofs: 1, credentials: 2 })
        ));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);

        let signatures = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await
            .unwrap();
        assert_eq!(signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_engine_failure_allows_retry_then_drops_session() {
        let (orch, keys) = orchestrator_with_engine(Arc::new(FailingEngine), ServerConfig::default());
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        for _ in 0..2 {
            let result = orch
                .submit_commitments(&qr.token, valid_commitment(&keys, &request))
                .await;
            assert!(matches!(result, Err(IssueError::ProofVerification(_))));
            assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
        }

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert_err!(result);
        assert!(matches!(
            orch.session_status(&qr.token),
            Err(IssueError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_invalid_proof_rejected_by_engine() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let mut tampered = request.clone();
        tampered.nonce = Some(num_bigint::BigUint::from(1u32));
        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &tampered))
            .await;
        assert!(matches!(result, Err(IssueError::ProofVerification(_))));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
    }

    #[tokio::test]
    async fn test_signing_timeout_is_retryable() {
        let config = ServerConfig {
            signing_timeout_ms: 50,
            max_commitment_attempts: 1,
            ..ServerConfig::default()
        };
        let (orch, keys) = orchestrator_with_engine(Arc::new(SlowEngine), config);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(result, Err(IssueError::SigningTimeout)));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_submissions() {
        let (orch, keys) = orchestrator();
        let orch = Arc::new(orch);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let attempts = (0..8).map(|_| {
            let orch = Arc::clone(&orch);
            let token = qr.token.clone();
            let commitments = valid_commitment(&keys, &request);
            tokio::spawn(async move { orch.submit_commitments(&token, commitments).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(IssueError::IllegalSessionState { .. }))));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Done);
    }

    #[tokio::test]
    async fn test_disclosure_proof_keys_attached() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let mut commitments = valid_commitment(&keys, &request);
        let disclosure = disclosure_proof(&keys, &request, "IssuerB");
        let mut proofs: Vec<_> = commitments.combined_proofs.iter().cloned().collect();
        proofs.push(disclosure);
        commitments.combined_proofs = crate::models::messages::ProofList::new(proofs);

        let signatures = orch.submit_commitments(&qr.token, commitments).await.unwrap();
        assert_eq!(signatures.len(), 2);
    }

    #[test]
    fn test_cancel_session() {
        let (orch, _) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        assert_ok!(orch.cancel_session(&qr.token));
        assert!(matches!(
            orch.fetch_request(&qr.token),
            Err(IssueError::SessionNotFound)
        ));
    }

    #[test]
    fn test_pipeline_refuses_to_sign_without_keys() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();
        let commitments = valid_commitment(&keys, &request);

        let pipeline = SigningPipeline::new(
            Arc::new(directory()),
            keys.clone(),
            Arc::new(EcdsaSigningEngine::new()),
        );
        let (_, running) = SigningRun::start();
        assert!(matches!(
            pipeline.sign_credentials(&request, &commitments, running.run()),
            Err(IssueError::Internal(_))
        ));
    }

    #[test]
    fn test_cancelled_run_makes_no_engine_call() {
        let (orch, keys) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();
        let engine = Arc::new(CountingEngine::new(0, Duration::ZERO));
        let pipeline = SigningPipeline::new(Arc::new(directory()), keys.clone(), engine.clone());

        let (run, _running) = SigningRun::start();
        run.cancel();
        assert!(matches!(
            pipeline.issue_signatures(&request, valid_commitment(&keys, &request), &run),
            Err(IssueError::SigningTimeout)
        ));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_runs_never_overlap() {
        let config = ServerConfig {
            signing_timeout_ms: 20,
            ..ServerConfig::default()
        };
        let engine = Arc::new(CountingEngine::new(usize::MAX, Duration::from_millis(200)));
        let (orch, keys) = orchestrator_with_engine(engine.clone(), config);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let first = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(first, Err(IssueError::SigningTimeout)));
        for _ in 0..4 {
            let retry = orch
                .submit_commitments(&qr.token, valid_commitment(&keys, &request))
                .await;
            assert!(matches!(retry, Err(IssueError::SigningInProgress)));
        }
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.calls(), 1);
        assert_eq!(engine.peak(), 1);

        let again = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(again, Err(IssueError::SigningTimeout)));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.calls(), 2);
        assert_eq!(engine.peak(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_do_not_use_up_attempts() {
        let config = ServerConfig {
            signing_timeout_ms: 20,
            max_commitment_attempts: 2,
            ..ServerConfig::default()
        };
        let engine = Arc::new(CountingEngine::new(1, Duration::from_millis(200)));
        let (orch, keys) = orchestrator_with_engine(engine, config);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(result, Err(IssueError::SigningTimeout)));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(result, Err(IssueError::Signing(_))));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(result, Err(IssueError::Signing(_))));
        assert!(matches!(
            orch.session_status(&qr.token),
            Err(IssueError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_exhausted_session_is_not_reopened() {
        let config = ServerConfig {
            max_commitment_attempts: 1,
            ..ServerConfig::default()
        };
        let (orch, keys) = orchestrator_with_engine(Arc::new(FailingEngine), config);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        let request = orch.fetch_request(&qr.token).unwrap();
        let handle = orch.store().get(&qr.token).unwrap();

        let result = orch
            .submit_commitments(&qr.token, valid_commitment(&keys, &request))
            .await;
        assert!(matches!(result, Err(IssueError::ProofVerification(_))));
        assert!(orch.store().is_empty());
        assert!(matches!(
            handle.lock().unwrap().begin_processing(),
            Err(IssueError::IllegalSessionState { actual: IssueStatus::Processing, .. })
        ));
    }

    #[test]
    fn test_cancel_while_processing_rejected() {
        let (orch, _) = orchestrator();
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();
        orch.fetch_request(&qr.token).unwrap();
        let handle = orch.store().get(&qr.token).unwrap();
        let (_, _running) = handle.lock().unwrap().begin_processing().unwrap();

        assert!(matches!(
            orch.cancel_session(&qr.token),
            Err(IssueError::IllegalSessionState { actual: IssueStatus::Processing, .. })
        ));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Processing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches() {
        let (orch, _) = orchestrator();
        let orch = Arc::new(orch);
        let qr = orch.create_session(issuer_a_and_b_request()).unwrap();

        let fetches = (0..8).map(|_| {
            let orch = Arc::clone(&orch);
            let token = qr.token.clone();
            tokio::task::spawn_blocking(move || orch.fetch_request(&token))
        });
        let results: Vec<_> = join_all(fetches)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter(|r| r.is_err()).all(|r| matches!(
            r,
            Err(IssueError::IllegalSessionState {
                expected: IssueStatus::Initialized,
                actual: IssueStatus::Connected
            })
        )));
        assert_eq!(orch.session_status(&qr.token).unwrap(), IssueStatus::Connected);
    }

    #[test]
    fn test_check_proof_count() {
        assert_ok!(check_proof_count(2, 2));
        assert_ok!(check_proof_count(3, 2));
        assert!(matches!(
            check_proof_count(1, 2),
            Err(IssueError::ProofCountMismatch { proofs: 1, credentials: 2 })
        ));
    }
}
