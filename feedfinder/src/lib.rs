//! # FeedFinder
//!
//! Authentication and session core for the FeedFinder social backend.
//!
//! A login goes through password verification, an optional emailed code, and
//! ends with a session: a row in the session store plus an access token and a
//! refresh token that both name it. Every later request is authorized by
//! decoding its token, checking the row is still live, and comparing the
//! device fingerprint embedded in the token with the caller's.
//!
//! ## Core Modules
//!
//! - [`auth`]: password hashing, registration and login flows, two-factor codes
//! - [`session`]: token codec, session store, session manager
//! - [`security`]: random tokens, constant-time comparison, CSRF tokens
//! - [`upload`]: filename, MIME and magic-byte validation for media uploads
//! - [`db`]: PostgreSQL pool and row stores
//! - [`mail`]: SMTP and development mailers
//!
//! ## Example
//!
//! ```
//! use feedfinder::upload::validate_bytes;
//!
//! let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
//! let file = validate_bytes("avatar.png", Some("image/png"), png).unwrap();
//! assert_eq!(file.extension, "png");
//! ```

pub mod auth;
pub mod db;
pub mod mail;
pub mod security;
pub mod session;
pub mod upload;

pub use auth::{AuthError, AuthManager, AuthResult, ClientContext};
pub use session::{SessionManager, TokenCodec};
