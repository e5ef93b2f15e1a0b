//! Session persistence.
//!
//! [`SessionStore`] is the only place session truth lives. The PostgreSQL
//! implementation is [`crate::db::PgSessionStore`]; [`MemorySessionStore`]
//! backs tests and single-process development runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::auth::{AuthError, AuthResult, NewSession, Session, UserId};

/// Trait for session storage operations
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session row
    ///
    /// # Errors
    ///
    /// * `AuthError::SessionConflict` - session id already present
    /// * `AuthError::Storage` - backend failure
    async fn create(&self, session: &NewSession) -> AuthResult<()>;

    /// True iff a row exists for `(session_id, user_id)`, is active and unexpired
    async fn is_valid(&self, session_id: &str, user_id: UserId) -> AuthResult<bool>;

    /// Fetch a session row regardless of its state
    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>>;

    /// Active, unexpired sessions of one user, newest first
    async fn list_active(&self, user_id: UserId) -> AuthResult<Vec<Session>>;

    /// Record an access; never extends the session's lifetime
    async fn touch(&self, session_id: &str) -> AuthResult<()>;

    /// Deactivate one session
    async fn invalidate(&self, session_id: &str) -> AuthResult<()>;

    /// Deactivate every session of a user
    async fn invalidate_all(&self, user_id: UserId) -> AuthResult<u64>;

    /// Delete expired or inactive rows, returning how many were removed
    async fn sweep(&self) -> AuthResult<u64>;

    /// Check the backend is reachable
    async fn health_check(&self) -> AuthResult<()>;
}

/// In-process session store
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held, swept or not
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &NewSession) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(AuthError::SessionConflict);
        }

        sessions.insert(
            session.session_id.clone(),
            Session {
                session_id: session.session_id.clone(),
                user_id: session.user_id,
                username: session.username.clone(),
                ip_address: session.ip_address.clone(),
                user_agent: session.user_agent.clone(),
                fingerprint: session.fingerprint.clone(),
                created_at: session.created_at,
                expires_at: session.expires_at,
                last_accessed: session.created_at,
                is_active: true,
            },
        );
        Ok(())
    }

    async fn is_valid(&self, session_id: &str, user_id: UserId) -> AuthResult<bool> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|s| s.user_id == user_id && s.is_valid_at(now)))
    }

    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_active(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let now = Utc::now();
        let mut active: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid_at(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn touch(&self, session_id: &str) -> AuthResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_accessed = Utc::now();
        }
        Ok(())
    }

    async fn invalidate(&self, session_id: &str) -> AuthResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.is_active = false;
        }
        Ok(())
    }

    async fn invalidate_all(&self, user_id: UserId) -> AuthResult<u64> {
        let mut count = 0;
        for session in self.sessions.write().await.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn sweep(&self) -> AuthResult<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_valid_at(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn health_check(&self) -> AuthResult<()> {
        Ok(())
    }
}
