//! Authentication data models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User ID type
pub type UserId = i64;

/// Account role, re-read from storage on every authorized request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub bio: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Row to insert for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub bio: String,
    pub is_private: bool,
}

/// Partial update of a user row; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<UserRole>,
    pub bio: Option<String>,
    pub is_private: Option<bool>,
}

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub private: bool,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Network identity of the caller, the input to the device fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Device fingerprint for this ip/user-agent pair.
    pub fn fingerprint(&self) -> String {
        crate::session::fingerprint(&self.ip_address, &self.user_agent)
    }
}

/// Outcome of a password login
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Credentials accepted and a session was created
    Authenticated { user: User, tokens: SessionTokens },
    /// Credentials accepted; a code was mailed and must be confirmed
    TwoFactorRequired { challenge_id: String },
}

/// Session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
}

/// Session model
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: UserId,
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    /// A session is usable iff it is active and not yet expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

/// Session row to insert
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub user_id: UserId,
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Pending two-factor challenge
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub challenge_id: String,
    pub user_id: UserId,
    pub email: String,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub attempts: u32,
}
