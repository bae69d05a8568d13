// src/services/issue_session.rs
//! Issuance session state machine.
//!
//! ```text
//! INITIALIZED --fetch--> CONNECTED --submit--> PROCESSING --ok--> DONE
//!                            ^                     |
//!                            +-------failure-------+
//! ```
//!
//! `PROCESSING` is held only while the signing engine runs, so a concurrent
//! duplicate submission is rejected instead of waiting on a lock.
//!
//! A run that outlives its caller (timeout) is cancelled, but the engine call
//! in progress cannot be interrupted. Until that call returns the session
//! refuses to start another run, so engine runs on one session never overlap.

use crate::error::{IssueError, IssueResult};
use crate::models::issuing_request::IssuingRequest;
use crate::storage::session_store::Session;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Protocol status of an issuance session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Initialized,
    Connected,
    Processing,
    Done,
}

impl IssueStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (self, next),
            (Initialized, Connected)
                | (Connected, Processing)
                | (Processing, Done)
                | (Processing, Connected)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == IssueStatus::Done
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueStatus::Initialized => "INITIALIZED",
            IssueStatus::Connected => "CONNECTED",
            IssueStatus::Processing => "PROCESSING",
            IssueStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// One signing run started by a commitment submission.
///
/// Clones share state. The run counts as running until the [`RunningGuard`]
/// created with it is dropped.
#[derive(Debug, Clone)]
pub struct SigningRun {
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl SigningRun {
    pub fn start() -> (SigningRun, RunningGuard) {
        let run = SigningRun {
            cancelled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
        };
        let guard = RunningGuard(run.clone());
        (run, guard)
    }

    /// Asks the run to stop before its next engine call.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Owned by whatever executes the run; marks it stopped when dropped.
#[derive(Debug)]
pub struct RunningGuard(SigningRun);

impl RunningGuard {
    pub fn run(&self) -> &SigningRun {
        &self.0
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// State of one issuance handshake.
///
/// Owned by the session store; mutate it only through the transition methods.
#[derive(Debug)]
pub struct IssueSession {
    token: String,
    /// Dropped once the session is done
    request: Option<IssuingRequest>,
    status: IssueStatus,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    ttl: Duration,
    done_retention: Duration,
    failed_attempts: u32,
    /// Issuer bookkeeping passed through from the create call
    data: Option<String>,
    run: Option<SigningRun>,
}

impl IssueSession {
    /// Creates a session in `INITIALIZED`.
    ///
    /// # Arguments
    /// * `token` - Session token
    /// * `request` - Validated request, nonce and context already set
    /// * `ttl` - Inactivity timeout before the session is done
    /// * `done_retention` - How long a done session stays queryable
    pub fn new(token: String, request: IssuingRequest, ttl: Duration, done_retention: Duration) -> Self {
        let now = Utc::now();
        IssueSession {
            token,
            request: Some(request),
            status: IssueStatus::Initialized,
            created_at: now,
            last_activity: now,
            ttl,
            done_retention,
            failed_attempts: 0,
            data: None,
            run: None,
        }
    }

    /// Attaches the issuer's free-form data to the session.
    pub fn with_data(mut self, data: Option<String>) -> Self {
        self.data = data;
        self
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn status(&self) -> IssueStatus {
        self.status
    }

    pub fn request(&self) -> Option<&IssuingRequest> {
        self.request.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Number of signing runs that failed with a non-retryable error.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// `INITIALIZED → CONNECTED`. Returns the request for the client.
    pub fn connect(&mut self) -> IssueResult<IssuingRequest> {
        self.transition(IssueStatus::Initialized, IssueStatus::Connected)?;
        self.cloned_request()
    }

    /// `CONNECTED → PROCESSING`. Returns the request to sign against and the
    /// guard of the new signing run.
    ///
    /// # Errors
    /// - `IllegalSessionState` unless the session is `CONNECTED`
    /// - `SigningInProgress` while an earlier, cancelled run is still inside
    ///   the engine
    pub fn begin_processing(&mut self) -> IssueResult<(IssuingRequest, RunningGuard)> {
        let request = match self.status {
            IssueStatus::Connected => self.cloned_request()?,
            actual => {
                return Err(IssueError::IllegalSessionState {
                    expected: IssueStatus::Connected,
                    actual,
                })
            }
        };
        if self.run.as_ref().map_or(false, SigningRun::is_running) {
            return Err(IssueError::SigningInProgress);
        }
        self.transition(IssueStatus::Connected, IssueStatus::Processing)?;
        let (run, guard) = SigningRun::start();
        self.run = Some(run);
        Ok((request, guard))
    }

    /// `PROCESSING → DONE`. Discards the request, nonce and context.
    pub fn complete(&mut self) -> IssueResult<()> {
        self.transition(IssueStatus::Processing, IssueStatus::Done)?;
        self.request = None;
        self.run = None;
        Ok(())
    }

    /// `PROCESSING → CONNECTED` after a failed run. Only non-retryable
    /// failures count toward [`failed_attempts`](Self::failed_attempts).
    pub fn abort(&mut self, failure: &IssueError) -> IssueResult<()> {
        self.transition(IssueStatus::Processing, IssueStatus::Connected)?;
        if !failure.is_retryable() {
            self.failed_attempts += 1;
        }
        Ok(())
    }

    fn transition(&mut self, expected: IssueStatus, next: IssueStatus) -> IssueResult<()> {
        if self.status != expected || !expected.can_transition_to(next) {
            return Err(IssueError::IllegalSessionState {
                expected,
                actual: self.status,
            });
        }
        self.status = next;
        self.last_activity = Utc::now();
        Ok(())
    }

    fn cloned_request(&self) -> IssueResult<IssuingRequest> {
        self.request
            .clone()
            .ok_or_else(|| IssueError::Internal(format!("session {} lost its request", self.token)))
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&mut self) {
        self.last_activity = Utc::now() - self.ttl.max(self.done_retention) - Duration::seconds(1);
    }
}

impl Session for IssueSession {
    fn token(&self) -> &str {
        &self.token
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            IssueStatus::Processing => false,
            IssueStatus::Done => self.last_activity + self.done_retention < now,
            IssueStatus::Initialized | IssueStatus::Connected => self.last_activity + self.ttl < now,
        }
    }
}
