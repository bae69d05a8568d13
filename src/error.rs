// src/error.rs
//! Error taxonomy for the issuance server.
//!
//! Every failure of a protocol call is one of the variants below. None of them
//! are retried internally: the caller decides whether to fix the request, retry
//! the commitment, or abandon the session.

use crate::services::issue_session::IssueStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while creating, advancing or querying an issuance session.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Malformed or incomplete issuer-side request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The named issuer has no known description.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// The issuer is known but no usable key is available.
    #[error("missing signing key for issuer {issuer} (counter {counter})")]
    MissingSigningKey { issuer: String, counter: u32 },

    /// Token unknown or expired.
    #[error("session not found")]
    SessionNotFound,

    /// A session with the same token already exists.
    #[error("duplicate session token")]
    DuplicateToken,

    /// The call does not match the session's current protocol state.
    #[error("illegal session state: expected {expected}, found {actual}")]
    IllegalSessionState {
        expected: IssueStatus,
        actual: IssueStatus,
    },

    /// Fewer proofs were submitted than credentials were requested.
    #[error("proof count mismatch: {proofs} proofs for {credentials} credentials")]
    ProofCountMismatch { proofs: usize, credentials: usize },

    #[error("proof verification failed: {0}")]
    ProofVerification(String),

    #[error("signing failed: {0}")]
    Signing(String),

    /// The signing engine did not answer within the configured bound.
    #[error("signing timed out")]
    SigningTimeout,

    /// An earlier signing run for the session has not stopped yet.
    #[error("signing still in progress for this session")]
    SigningInProgress,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type IssueResult<T> = Result<T, IssueError>;

impl IssueError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            IssueError::InvalidRequest(_) => "INVALID_REQUEST",
            IssueError::UnknownIssuer(_) => "UNKNOWN_ISSUER",
            IssueError::MissingSigningKey { .. } => "MISSING_SIGNING_KEY",
            IssueError::SessionNotFound => "SESSION_UNKNOWN",
            IssueError::DuplicateToken => "DUPLICATE_TOKEN",
            IssueError::IllegalSessionState { .. } => "UNEXPECTED_REQUEST",
            IssueError::ProofCountMismatch { .. } => "PROOF_COUNT_MISMATCH",
            IssueError::ProofVerification(_) => "INVALID_PROOFS",
            IssueError::Signing(_) => "SIGNING_FAILED",
            IssueError::SigningTimeout => "SIGNING_TIMEOUT",
            IssueError::SigningInProgress => "SIGNING_IN_PROGRESS",
            IssueError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the error is surfaced as.
    ///
    /// Out-of-order or replayed calls are authorization-class (401): the
    /// session exists but the caller may not perform this step now.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IssueError::InvalidRequest(_)
            | IssueError::UnknownIssuer(_)
            | IssueError::MissingSigningKey { .. }
            | IssueError::ProofCountMismatch { .. }
            | IssueError::ProofVerification(_) => StatusCode::BAD_REQUEST,
            IssueError::SessionNotFound => StatusCode::NOT_FOUND,
            IssueError::IllegalSessionState { .. } => StatusCode::UNAUTHORIZED,
            IssueError::SigningTimeout | IssueError::SigningInProgress => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            IssueError::DuplicateToken | IssueError::Signing(_) | IssueError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IssueError::SigningTimeout | IssueError::SigningInProgress)
    }
}

/// JSON body returned for every failed API call.
#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub error: &'static str,
    pub status: u16,
    pub description: String,
}

impl IntoResponse for IssueError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorMessage {
            error: self.code(),
            status: status.as_u16(),
            description: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
