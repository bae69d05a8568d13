// src/services/api_server.rs
//! HTTP interface of the issuance server.
//!
//! Routes:
//! - `POST   /issue`                     issuer backend opens a session
//! - `GET    /issue/:token`              client fetches the issuing request
//! - `POST   /issue/:token/commitments`  client submits commitments, receives signatures
//! - `GET    /issue/:token/status`       current session status
//! - `DELETE /issue/:token`              cancel a session
//!
//! Every failure is answered with an [`ApiErrorMessage`](crate::error::ApiErrorMessage)
//! JSON body.

use crate::error::IssueError;
use crate::models::issuing_request::{ClientQr, IdentityProviderRequest};
use crate::models::messages::{CommitmentMessage, SignatureMessage};
use crate::services::issuance_orchestrator::IssuanceOrchestrator;
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// API server state
#[derive(Clone)]
pub struct ApiServer {
    /// Protocol logic and session store
    orchestrator: Arc<IssuanceOrchestrator>,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `orchestrator` - Issuance protocol driver shared by all handlers
    pub fn new(orchestrator: Arc<IssuanceOrchestrator>) -> Self {
        ApiServer { orchestrator }
    }

    /// Builds the router with all issuance routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/issue", post(Self::create_session_handler))
            .route(
                "/issue/:token",
                get(Self::fetch_request_handler).delete(Self::cancel_session_handler),
            )
            .route("/issue/:token/commitments", post(Self::submit_commitments_handler))
            .route("/issue/:token/status", get(Self::session_status_handler))
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:8088")
    ///
    /// # Errors
    /// Fails if the address cannot be bound or the server stops with an error.
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("Issuance server listening on {}", addr);

        axum::serve(listener, app).await
    }

    /// Opens a new issuance session
    ///
    /// # Endpoint
    /// POST /issue
    ///
    /// # Request Body
    /// `IdentityProviderRequest` with the credentials to issue
    ///
    /// # Responses
    /// - 200 OK: `{protocolVersion, token}`
    /// - 400 Bad Request: Malformed or invalid request, unknown issuer, missing key
    async fn create_session_handler(
        State(state): State<Arc<ApiServer>>,
        payload: Result<Json<IdentityProviderRequest>, JsonRejection>,
    ) -> Result<Json<ClientQr>, IssueError> {
        let Json(ip_request) = payload.map_err(reject_body)?;
        state
            .orchestrator
            .create_session(ip_request)
            .map(Json)
    }

    /// Returns the issuing request to the client
    ///
    /// # Endpoint
    /// GET /issue/:token
    ///
    /// # Responses
    /// - 200 OK: The stored issuing request, including nonce and context
    /// - 401 Unauthorized: Session was already fetched
    /// - 404 Not Found: Unknown or expired token
    async fn fetch_request_handler(
        Path(token): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        state.orchestrator.fetch_request(&token).map(Json)
    }

    /// Signs the session's credentials against the client's commitments
    ///
    /// # Endpoint
    /// POST /issue/:token/commitments
    ///
    /// # Request Body
    /// `CommitmentMessage` with the combined proof list and client nonce
    ///
    /// # Responses
    /// - 200 OK: One signature message per credential, in request order
    /// - 400 Bad Request: Too few proofs or a proof does not verify
    /// - 401 Unauthorized: Session not in `CONNECTED`
    /// - 404 Not Found: Unknown or expired token
    /// - 503 Service Unavailable: Signing timed out; the call may be retried
    async fn submit_commitments_handler(
        Path(token): Path<String>,
        State(state): State<Arc<ApiServer>>,
        payload: Result<Json<CommitmentMessage>, JsonRejection>,
    ) -> Result<Json<Vec<SignatureMessage>>, IssueError> {
        let Json(commitments) = payload.map_err(reject_body)?;
        state
            .orchestrator
            .submit_commitments(&token, commitments)
            .await
            .map(Json)
    }

    /// # Endpoint
    /// GET /issue/:token/status
    async fn session_status_handler(
        Path(token): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        state.orchestrator.session_status(&token).map(Json)
    }

    /// # Endpoint
    /// DELETE /issue/:token
    ///
    /// # Responses
    /// - 204 No Content: Session removed
    /// - 401 Unauthorized: Signatures are being computed
    /// - 404 Not Found: Unknown or expired token
    async fn cancel_session_handler(
        Path(token): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        state
            .orchestrator
            .cancel_session(&token)
            .map(|()| StatusCode::NO_CONTENT)
    }
}

fn reject_body(rejection: JsonRejection) -> IssueError {
    log::warn!("Rejected request body: {}", rejection.body_text());
    IssueError::InvalidRequest(rejection.body_text())
}
