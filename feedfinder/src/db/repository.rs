//! Repository traits and their PostgreSQL implementations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::auth::{
    AuthError, AuthResult, ChallengeStore, NewSession, NewUser, PendingChallenge, Session, User,
    UserId, UserRole, UserUpdate,
};
use crate::security::{CsrfStore, CsrfToken};
use crate::session::SessionStore;

/// Trait for user row operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user
    ///
    /// # Errors
    ///
    /// * `AuthError::UsernameTaken` / `AuthError::EmailTaken` - unique key clash
    async fn create_user(&self, user: &NewUser) -> AuthResult<User>;

    /// Find user by username
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>>;

    /// Find user by email
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// Find user by ID
    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>>;

    /// Apply a partial update
    ///
    /// # Errors
    ///
    /// * `AuthError::UserNotFound` - no such user
    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> AuthResult<()>;

    /// Update user's last login timestamp
    async fn touch_last_login(&self, user_id: UserId) -> AuthResult<()>;
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    naive.and_utc()
}

fn user_from_row(r: &PgRow) -> User {
    User {
        id: r.get("id"),
        username: r.get("username"),
        email: r.get("email"),
        password_hash: r.get("password_hash"),
        role: r
            .get::<String, _>("role")
            .parse()
            .unwrap_or(UserRole::User),
        bio: r.get("bio"),
        is_private: r.get("is_private"),
        created_at: utc(r.get("created_at")),
        last_login: r
            .get::<Option<NaiveDateTime>, _>("last_login")
            .map(utc),
    }
}

fn session_from_row(r: &PgRow) -> Session {
    Session {
        session_id: r.get("session_id"),
        user_id: r.get("user_id"),
        username: r.get("username"),
        ip_address: r.get("ip_address"),
        user_agent: r.get("user_agent"),
        fingerprint: r.get("fingerprint"),
        created_at: utc(r.get("created_at")),
        expires_at: utc(r.get("expires_at")),
        last_accessed: utc(r.get("last_accessed")),
        is_active: r.get("is_active"),
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, bio, is_private, created_at, last_login";

const SESSION_COLUMNS: &str = "session_id, user_id, username, ip_address, user_agent, \
     fingerprint, created_at, expires_at, last_accessed, is_active";

/// Default PostgreSQL implementation of `UserRepository`
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: &NewUser) -> AuthResult<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, password_hash, bio, is_private)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.bio)
        .bind(user.is_private)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return if db.constraint() == Some("users_email_key") {
                        AuthError::EmailTaken
                    } else {
                        AuthError::UsernameTaken
                    };
                }
            }
            AuthError::Storage(e)
        })?;

        Ok(user_from_row(&row))
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> AuthResult<()> {
        let result = sqlx::query(
            "UPDATE users SET
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                role = COALESCE($4, role),
                bio = COALESCE($5, bio),
                is_private = COALESCE($6, is_private)
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(&update.email)
        .bind(&update.password_hash)
        .bind(update.role.map(|r| r.as_str()))
        .bind(&update.bio)
        .bind(update.is_private)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn touch_last_login(&self, user_id: UserId) -> AuthResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// PostgreSQL session store
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &NewSession) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO sessions
                (session_id, user_id, username, ip_address, user_agent, fingerprint,
                 created_at, expires_at, last_accessed, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $7, TRUE)",
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(&session.username)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.fingerprint)
        .bind(session.created_at.naive_utc())
        .bind(session.expires_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return AuthError::SessionConflict;
                }
            }
            AuthError::Storage(e)
        })?;
        Ok(())
    }

    async fn is_valid(&self, session_id: &str, user_id: UserId) -> AuthResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM sessions
             WHERE session_id = $1 AND user_id = $2 AND is_active AND expires_at > $3",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(Utc::now().naive_utc())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn list_active(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = $1 AND is_active AND expires_at > $2
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(Utc::now().naive_utc())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn touch(&self, session_id: &str) -> AuthResult<()> {
        sqlx::query("UPDATE sessions SET last_accessed = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, session_id: &str) -> AuthResult<()> {
        sqlx::query("UPDATE sessions SET is_active = FALSE WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn invalidate_all(&self, user_id: UserId) -> AuthResult<u64> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn sweep(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1 OR NOT is_active")
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> AuthResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// PostgreSQL two-factor challenge store
#[derive(Clone)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn insert(&self, challenge: &PendingChallenge) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO two_factor_challenges
                (challenge_id, user_id, email, code, issued_at, attempts)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&challenge.challenge_id)
        .bind(challenge.user_id)
        .bind(&challenge.email)
        .bind(&challenge.code)
        .bind(challenge.issued_at.naive_utc())
        .bind(challenge.attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, challenge_id: &str) -> AuthResult<Option<PendingChallenge>> {
        let row = sqlx::query(
            "SELECT challenge_id, user_id, email, code, issued_at, attempts
             FROM two_factor_challenges WHERE challenge_id = $1",
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PendingChallenge {
            challenge_id: r.get("challenge_id"),
            user_id: r.get("user_id"),
            email: r.get("email"),
            code: r.get("code"),
            issued_at: utc(r.get("issued_at")),
            attempts: r.get::<i32, _>("attempts").max(0) as u32,
        }))
    }

    async fn reserve_attempt(
        &self,
        challenge_id: &str,
        max_attempts: u32,
    ) -> AuthResult<Option<u32>> {
        let row = sqlx::query(
            "UPDATE two_factor_challenges SET attempts = attempts + 1
             WHERE challenge_id = $1 AND attempts < $2
             RETURNING attempts",
        )
        .bind(challenge_id)
        .bind(max_attempts as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i32, _>("attempts").max(0) as u32))
    }

    async fn delete(&self, challenge_id: &str) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM two_factor_challenges WHERE challenge_id = $1")
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM two_factor_challenges WHERE issued_at < $1")
            .bind(cutoff.naive_utc())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL CSRF token store, shared by every server process
#[derive(Clone)]
pub struct PgCsrfStore {
    pool: PgPool,
}

impl PgCsrfStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CsrfStore for PgCsrfStore {
    async fn get(&self, key: &str) -> AuthResult<Option<CsrfToken>> {
        let row = sqlx::query("SELECT value, expires_at FROM csrf_tokens WHERE session_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| CsrfToken {
            value: r.get("value"),
            expires_at: utc(r.get("expires_at")),
        }))
    }

    async fn put(&self, key: &str, token: CsrfToken) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO csrf_tokens (session_key, value, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (session_key)
             DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(&token.value)
        .bind(token.expires_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        sqlx::query("DELETE FROM csrf_tokens WHERE session_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM csrf_tokens WHERE expires_at < $1")
            .bind(now.naive_utc())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
