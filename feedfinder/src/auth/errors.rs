//! Authentication error types.

use thiserror::Error;

use crate::mail::MailError;
use crate::session::TokenError;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Storage backend unreachable or failing
    #[error("Storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Unknown user or wrong password
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// User not found
    #[error("User not found")]
    UserNotFound,

    /// Username already exists
    #[error("Username already exists")]
    UsernameTaken,

    /// Email already exists
    #[error("Email already exists")]
    EmailTaken,

    /// Registration or login input rejected
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// No credential on the request
    #[error("Authentication required")]
    NoToken,

    /// Token failed to decode, verify or had the wrong type
    #[error("Invalid token")]
    InvalidToken,

    /// Token past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Session missing, inactive or expired in the store
    #[error("Session not found or revoked")]
    SessionRevoked,

    /// Token presented from a different ip/user-agent than it was issued to
    #[error("Session security check failed")]
    FingerprintMismatch,

    /// Role check failed
    #[error("Insufficient permissions")]
    InsufficientPermissions,

    /// CSRF token missing, expired or mismatched
    #[error("Invalid or missing CSRF token")]
    CsrfTokenInvalid,

    /// No pending two-factor challenge
    #[error("No verification code found")]
    TwoFactorNotFound,

    /// Pending two-factor challenge older than its window
    #[error("Verification code expired")]
    TwoFactorExpired,

    /// Submitted two-factor code does not match
    #[error("Incorrect verification code")]
    TwoFactorIncorrect,

    /// Too many wrong codes for one challenge
    #[error("Too many verification attempts")]
    TwoFactorLocked,

    /// Mail delivery failed
    #[error("Mail delivery failed: {0}")]
    Mail(#[from] MailError),

    /// Session id collision on insert
    #[error("Session already exists")]
    SessionConflict,

    /// Token could not be signed
    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl AuthError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Storage(_) => "STORAGE_UNAVAILABLE",
            AuthError::HashingFailed | AuthError::SessionConflict | AuthError::Signing(_) => {
                "INTERNAL_ERROR"
            }
            AuthError::InvalidCredentials | AuthError::UserNotFound => "INVALID_CREDENTIALS",
            AuthError::UsernameTaken => "USERNAME_TAKEN",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::Validation(_) | AuthError::WeakPassword(_) => "VALIDATION_ERROR",
            AuthError::NoToken => "NO_TOKEN",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "EXPIRED",
            AuthError::SessionRevoked => "SESSION_REVOKED",
            AuthError::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            AuthError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AuthError::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            AuthError::TwoFactorNotFound => "TWO_FACTOR_NOT_FOUND",
            AuthError::TwoFactorExpired => "TWO_FACTOR_EXPIRED",
            AuthError::TwoFactorIncorrect => "TWO_FACTOR_INCORRECT",
            AuthError::TwoFactorLocked => "TWO_FACTOR_LOCKED",
            AuthError::Mail(_) => "MAIL_FAILED",
        }
    }

    /// True for failures of a presented token or the session behind it.
    pub fn is_token_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken
                | AuthError::TokenExpired
                | AuthError::SessionRevoked
                | AuthError::FingerprintMismatch
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Storage and mail errors are sanitized, and every token/session failure
    /// collapses into one message so a caller can't tell which check tripped.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Storage(_) => "Service temporarily unavailable".to_string(),
            AuthError::Mail(_) => "Failed to send verification code".to_string(),
            AuthError::HashingFailed | AuthError::SessionConflict | AuthError::Signing(_) => {
                "Failed to create session".to_string()
            }
            AuthError::UserNotFound => AuthError::InvalidCredentials.to_string(),
            e if e.is_token_failure() => "Invalid or expired session".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid | TokenError::WrongType => AuthError::InvalidToken,
            TokenError::Encoding(e) => AuthError::Signing(e.to_string()),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_share_one_client_message() {
        let messages: Vec<String> = [
            AuthError::InvalidToken,
            AuthError::TokenExpired,
            AuthError::SessionRevoked,
            AuthError::FingerprintMismatch,
        ]
        .iter()
        .map(AuthError::client_message)
        .collect();

        assert!(messages.iter().all(|m| m == "Invalid or expired session"));
    }

    #[test]
    fn codes_keep_failures_distinct() {
        assert_eq!(AuthError::TokenExpired.code(), "EXPIRED");
        assert_eq!(AuthError::SessionRevoked.code(), "SESSION_REVOKED");
        assert_eq!(AuthError::FingerprintMismatch.code(), "FINGERPRINT_MISMATCH");
        assert_eq!(AuthError::NoToken.code(), "NO_TOKEN");
        assert_eq!(AuthError::CsrfTokenInvalid.code(), "CSRF_TOKEN_INVALID");
    }

    #[test]
    fn storage_errors_are_not_auth_failures() {
        let err = AuthError::Storage(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
        assert!(!err.is_token_failure());
        assert!(!err.client_message().contains("pool"));
    }

    #[test]
    fn token_error_mapping() {
        assert!(matches!(
            AuthError::from(TokenError::Expired),
            AuthError::TokenExpired
        ));
        assert!(matches!(
            AuthError::from(TokenError::WrongType),
            AuthError::InvalidToken
        ));
    }
}
