//! Authentication module providing registration, login and account security.
//!
//! This module implements:
//! - Argon2id password hashing with per-hash random salts
//! - Login with an optional second step: a 6-digit code sent by email
//! - Password changes that revoke every existing session
//!
//! Session issue and verification live in [`crate::session`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedfinder::auth::{AuthManager, ClientContext, RegisterRequest};
//! use feedfinder::db::MemoryUserRepository;
//! use feedfinder::session::{MemorySessionStore, SessionManager, TokenCodec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = Arc::new(MemoryUserRepository::new());
//!     let sessions = SessionManager::new(
//!         TokenCodec::new("a_signing_secret_of_at_least_32_chars"),
//!         Arc::new(MemorySessionStore::new()),
//!         users.clone(),
//!     );
//!     let auth = AuthManager::new(users, sessions, None);
//!
//!     let request = RegisterRequest {
//!         username: "alice".to_string(),
//!         email: "alice@example.com".to_string(),
//!         password: "SecurePass123".to_string(),
//!         confirm_password: "SecurePass123".to_string(),
//!         bio: String::new(),
//!         private: false,
//!     };
//!
//!     let client = ClientContext::new("127.0.0.1", "doc-example");
//!     let (user, tokens) = auth.register(request, &client).await?;
//!     println!("Registered {} with session {}", user.username, tokens.session_id);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod password;
pub mod two_factor;

pub use errors::{AuthError, AuthResult};
pub use manager::AuthManager;
pub use models::{
    ClientContext, LoginOutcome, LoginRequest, NewSession, NewUser, PendingChallenge,
    RegisterRequest, Session, SessionTokens, User, UserId, UserRole, UserUpdate,
};
pub use password::{hash_password, verify_password};
pub use two_factor::{ChallengeStore, MemoryChallengeStore, TwoFactorService};
