//! Session manager: token codec plus session store.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::{
    store::SessionStore,
    token::{AccessClaims, TokenCodec},
};
use crate::auth::{
    AuthError, AuthResult, ClientContext, NewSession, Session, SessionTokens, UserId,
};
use crate::db::UserRepository;
use crate::security::constant_time_eq;

/// Default lifetime of a session row (24 hours)
pub const SESSION_TTL: Duration = Duration::hours(24);

/// Creates, verifies, refreshes and revokes sessions.
///
/// Holds no per-session state of its own; every decision is made against the
/// store, so instances can be cloned freely across tasks.
#[derive(Clone)]
pub struct SessionManager {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserRepository>,
    session_ttl: Duration,
}

impl SessionManager {
    /// Create a new session manager
    ///
    /// # Arguments
    ///
    /// * `codec` - Token codec built from the signing secret
    /// * `store` - Session persistence
    /// * `users` - User lookup, used by refresh to pick up renamed accounts
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            codec,
            store,
            users,
            session_ttl: SESSION_TTL,
        }
    }

    /// Override the session row lifetime
    pub fn with_session_ttl(mut self, session_ttl: Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Start a session for an authenticated user
    ///
    /// Both tokens share one freshly generated session id. The row is written
    /// after the tokens are minted; if the write fails the tokens are dropped.
    ///
    /// # Errors
    ///
    /// * `AuthError::Signing` - tokens could not be signed
    /// * `AuthError::Storage` - session row could not be written
    pub async fn create_session(
        &self,
        user_id: UserId,
        username: &str,
        client: &ClientContext,
    ) -> AuthResult<SessionTokens> {
        let (access_token, session_id) = self.codec.encode_access(user_id, username, client)?;
        let refresh_token = self.codec.encode_refresh(user_id, &session_id)?;

        let now = Utc::now();
        self.store
            .create(&NewSession {
                session_id: session_id.clone(),
                user_id,
                username: username.to_string(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                fingerprint: client.fingerprint(),
                created_at: now,
                expires_at: now + self.session_ttl,
            })
            .await?;

        log::info!("Session created for user {user_id} from {}", client.ip_address);

        Ok(SessionTokens {
            access_token,
            refresh_token,
            session_id,
        })
    }

    /// Authorize a request carrying an access token
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenExpired` / `AuthError::InvalidToken` - token refused
    /// * `AuthError::SessionRevoked` - session logged out, swept or expired
    /// * `AuthError::FingerprintMismatch` - token presented by another client
    /// * `AuthError::Storage` - store unreachable
    pub async fn verify_access(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> AuthResult<AccessClaims> {
        let claims = self.codec.decode_access(token)?;

        if !self
            .store
            .is_valid(&claims.session_id, claims.user_id)
            .await?
        {
            return Err(AuthError::SessionRevoked);
        }

        if !constant_time_eq(&claims.fingerprint, &client.fingerprint()) {
            log::warn!(
                "Fingerprint mismatch for session of user {} (issued to {}, presented from {})",
                claims.user_id,
                claims.ip_address,
                client.ip_address
            );
            return Err(AuthError::FingerprintMismatch);
        }

        self.store.touch(&claims.session_id).await?;
        Ok(claims)
    }

    /// Mint a new access token from a refresh token
    ///
    /// The session id is kept and the refresh token is not rotated. The new
    /// access token is bound to the client doing the refresh.
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenExpired` / `AuthError::InvalidToken` - token refused
    /// * `AuthError::SessionRevoked` - session no longer valid
    /// * `AuthError::UserNotFound` - account removed since login
    pub async fn refresh(&self, refresh_token: &str, client: &ClientContext) -> AuthResult<String> {
        let claims = self.codec.decode_refresh(refresh_token)?;

        if !self
            .store
            .is_valid(&claims.session_id, claims.user_id)
            .await?
        {
            return Err(AuthError::SessionRevoked);
        }

        let user = self
            .users
            .find_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if let Some(session) = self.store.find(&claims.session_id).await? {
            if session.fingerprint != client.fingerprint() {
                log::info!(
                    "Session of user {} refreshed from a different client ({} -> {})",
                    user.id,
                    session.ip_address,
                    client.ip_address
                );
            }
        }

        let access_token =
            self.codec
                .encode_access_for_session(user.id, &user.username, &claims.session_id, client)?;
        Ok(access_token)
    }

    /// Revoke one session, or every session of `user_id` when given
    pub async fn invalidate(&self, session_id: &str, user_id: Option<UserId>) -> AuthResult<()> {
        match user_id {
            Some(user_id) => {
                let revoked = self.store.invalidate_all(user_id).await?;
                log::info!("Revoked {revoked} sessions of user {user_id}");
            }
            None => {
                self.store.invalidate(session_id).await?;
                log::info!("Revoked session {}", redact(session_id));
            }
        }
        Ok(())
    }

    /// Revoke every session of a user
    pub async fn invalidate_all(&self, user_id: UserId) -> AuthResult<u64> {
        self.store.invalidate_all(user_id).await
    }

    /// Delete expired and revoked session rows
    pub async fn sweep(&self) -> AuthResult<u64> {
        let removed = self.store.sweep().await?;
        log::debug!("Session sweep removed {removed} rows");
        Ok(removed)
    }

    /// Currently valid sessions of a user, newest first
    pub async fn active_sessions(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        self.store.list_active(user_id).await
    }
}

/// Short prefix of a session id, safe to log
fn redact(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}
