//! Session persistence keyed by nonce.
//!
//! The store carries no policy: it records pending and bound sessions and
//! offers one atomic transition, [`SessionStore::bind`], so that two
//! concurrent sign-ins on the same nonce cannot both succeed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::crypto::message::Message;
use crate::error::AuthError;

#[derive(Clone, Debug)]
pub enum SessionState {
    /// Nonce issued, no identity attached yet
    Pending,
    /// Nonce consumed by a verified message
    Bound {
        message: Box<Message>,
        bound_at: DateTime<Utc>,
    },
}

#[derive(Clone, Debug)]
pub struct StoredSession {
    pub nonce: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

impl StoredSession {
    pub fn pending(nonce: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            nonce: nonce.into(),
            created_at: now,
            state: SessionState::Pending,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.state {
            SessionState::Pending => None,
            SessionState::Bound { message, .. } => Some(message),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, SessionState::Bound { .. })
    }

    /// Whether the session outlived its TTL
    ///
    /// Pending sessions age from issuance, bound sessions from sign-in.
    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        pending_ttl: chrono::Duration,
        bound_ttl: chrono::Duration,
    ) -> bool {
        match &self.state {
            SessionState::Pending => now - self.created_at > pending_ttl,
            SessionState::Bound { bound_at, .. } => now - *bound_at > bound_ttl,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store failure: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("no session for nonce")]
    NotFound,

    #[error("nonce is already bound")]
    AlreadyBound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

impl From<BindError> for AuthError {
    fn from(e: BindError) -> Self {
        match e {
            BindError::NotFound => AuthError::SessionNotFound,
            BindError::AlreadyBound => AuthError::SessionAlreadyExists,
            BindError::Store(e) => e.into(),
        }
    }
}

/// Key/value persistence of sessions
///
/// Every operation is idempotent and safe to call for an unknown nonce.
/// Implementations must be safe for concurrent use from many request handlers.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, nonce: &str) -> Result<Option<StoredSession>, StoreError>;

    /// Insert or replace the session stored under `session.nonce`
    async fn save(&self, session: StoredSession) -> Result<(), StoreError>;

    async fn remove(&self, nonce: &str) -> Result<(), StoreError>;

    /// Atomically promote a pending session to bound
    ///
    /// The existence check, the already-bound check and the write happen as
    /// one step per nonce.
    async fn bind(
        &self,
        nonce: &str,
        message: Message,
        now: DateTime<Utc>,
    ) -> Result<StoredSession, BindError>;

    /// Drop sessions older than their TTL, returning how many were removed
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        pending_ttl: chrono::Duration,
        bound_ttl: chrono::Duration,
    ) -> Result<usize, StoreError>;
}

/// In-process store for single-instance deployments
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Internal("session map lock poisoned".to_string())
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, nonce: &str) -> Result<Option<StoredSession>, StoreError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(nonce).cloned())
    }

    async fn save(&self, session: StoredSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.nonce.clone(), session);
        Ok(())
    }

    async fn remove(&self, nonce: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.remove(nonce);
        Ok(())
    }

    async fn bind(
        &self,
        nonce: &str,
        message: Message,
        now: DateTime<Utc>,
    ) -> Result<StoredSession, BindError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions.get_mut(nonce).ok_or(BindError::NotFound)?;
        if session.is_bound() {
            return Err(BindError::AlreadyBound);
        }
        session.state = SessionState::Bound {
            message: Box::new(message),
            bound_at: now,
        };
        Ok(session.clone())
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        pending_ttl: chrono::Duration,
        bound_ttl: chrono::Duration,
    ) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now, pending_ttl, bound_ttl));
        Ok(before - sessions.len())
    }
}

/// Periodically purge expired sessions until the returned task is aborted
pub fn spawn_session_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    pending_ttl: chrono::Duration,
    bound_ttl: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.purge_expired(Utc::now(), pending_ttl, bound_ttl).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session purge failed"),
            }
        }
    })
}
