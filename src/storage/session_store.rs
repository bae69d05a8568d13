// src/storage/session_store.rs
//! Session storage for in-progress protocol runs.
//!
//! Maps opaque tokens to sessions. The map itself sits behind an `RwLock`;
//! each session sits behind its own `Mutex`, so status changes on one token
//! are serialized while other tokens proceed in parallel.
//!
//! Expired sessions are never returned: a lookup that finds one removes it,
//! and a background reaper sweeps the rest.

use crate::error::{IssueError, IssueResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A session that can live in a [`SessionStore`].
pub trait Session: Send + 'static {
    /// Token the session is addressed by.
    fn token(&self) -> &str;

    /// Whether the session is past its lifetime at `now`.
    fn is_expired(&self, now: DateTime<Utc>) -> bool;
}

/// Shared handle to a stored session. Lock it to read or change the session.
pub type SessionHandle<S> = Arc<Mutex<S>>;

/// Thread-safe token → session map with expiry.
pub struct SessionStore<S: Session> {
    sessions: RwLock<HashMap<String, SessionHandle<S>>>,
}

impl<S: Session> Default for SessionStore<S> {
    fn default() -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Session> SessionStore<S> {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `session` under its token.
    ///
    /// # Returns
    /// Handle to the stored session
    ///
    /// # Errors
    /// `DuplicateToken` if a session with that token already exists.
    pub fn create(&self, session: S) -> IssueResult<SessionHandle<S>> {
        let token = session.token().to_string();
        let mut sessions = self.write()?;
        if sessions.contains_key(&token) {
            return Err(IssueError::DuplicateToken);
        }
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(token, Arc::clone(&handle));
        Ok(handle)
    }

    /// Looks up a live session.
    ///
    /// # Errors
    /// `SessionNotFound` if the token is unknown or the session has expired.
    pub fn get(&self, token: &str) -> IssueResult<SessionHandle<S>> {
        self.get_at(token, Utc::now())
    }

    /// Same as [`get`](Self::get), judging expiry at `now`.
    pub fn get_at(&self, token: &str, now: DateTime<Utc>) -> IssueResult<SessionHandle<S>> {
        let handle = {
            let sessions = self.read()?;
            sessions.get(token).cloned().ok_or(IssueError::SessionNotFound)?
        };

        let expired = handle
            .lock()
            .map_err(|_| IssueError::Internal("session lock poisoned".into()))?
            .is_expired(now);
        if expired {
            let mut sessions = self.write()?;
            if sessions
                .get(token)
                .map_or(false, |current| Arc::ptr_eq(current, &handle))
            {
                sessions.remove(token);
            }
            log::debug!("Session {} expired", token);
            return Err(IssueError::SessionNotFound);
        }
        Ok(handle)
    }

    /// Removes a session. Returns true if it was present.
    pub fn remove(&self, token: &str) -> bool {
        match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(token).is_some(),
            Err(_) => false,
        }
    }

    /// Number of stored sessions, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every session expired at `now`.
    ///
    /// Sessions whose lock is currently held are skipped; they are in use and
    /// will be judged on the next sweep.
    ///
    /// # Returns
    /// Number of sessions removed
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = match self.sessions.write() {
            Ok(sessions) => sessions,
            Err(_) => return 0,
        };
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => !session.is_expired(now),
            Err(_) => true,
        });
        before - sessions.len()
    }

    fn read(
        &self,
    ) -> IssueResult<std::sync::RwLockReadGuard<'_, HashMap<String, SessionHandle<S>>>> {
        self.sessions
            .read()
            .map_err(|_| IssueError::Internal("session store lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> IssueResult<std::sync::RwLockWriteGuard<'_, HashMap<String, SessionHandle<S>>>> {
        self.sessions
            .write()
            .map_err(|_| IssueError::Internal("session store lock poisoned".into()))
    }
}

/// Spawns a task that evicts expired sessions every `interval`.
pub fn spawn_reaper<S: Session>(store: Arc<SessionStore<S>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = store.evict_expired(Utc::now());
            if evicted > 0 {
                log::info!("Evicted {} expired sessions, {} remain", evicted, store.len());
            }
        }
    })
}
