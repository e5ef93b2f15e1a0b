//! JSON error responses.
//!
//! Every failure leaves the API as `{"success": false, "message", "error"}`
//! with a status derived from the error kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use feedfinder::AuthError;
use feedfinder::upload::FileValidationError;
use serde_json::json;

/// Error returned by handlers and middleware
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Upload(FileValidationError),
    /// Malformed request outside the auth flows
    Request { status: StatusCode, message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Request {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(err) => auth_status(err),
            ApiError::Upload(FileValidationError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Request { status, .. } => *status,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<FileValidationError> for ApiError {
    fn from(err: FileValidationError) -> Self {
        ApiError::Upload(err)
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Validation(_) | AuthError::WeakPassword(_) => StatusCode::BAD_REQUEST,
        AuthError::UsernameTaken | AuthError::EmailTaken => StatusCode::CONFLICT,
        AuthError::InsufficientPermissions | AuthError::CsrfTokenInvalid => StatusCode::FORBIDDEN,
        AuthError::TwoFactorLocked => StatusCode::TOO_MANY_REQUESTS,
        AuthError::NoToken
        | AuthError::InvalidCredentials
        | AuthError::UserNotFound
        | AuthError::TwoFactorNotFound
        | AuthError::TwoFactorExpired
        | AuthError::TwoFactorIncorrect => StatusCode::UNAUTHORIZED,
        e if e.is_token_failure() => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::Auth(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, code = err.code(), "Request failed");
                }
                json!({
                    "success": false,
                    "message": err.client_message(),
                    "error": err.code(),
                })
            }
            ApiError::Upload(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, "Upload could not be read");
                }
                json!({
                    "success": false,
                    "message": err.to_string(),
                    "error": err.code(),
                    "reason": err.reason(),
                })
            }
            ApiError::Request { message, .. } => json!({
                "success": false,
                "message": message,
                "error": "BAD_REQUEST",
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(AuthError::NoToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::FingerprintMismatch).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::InsufficientPermissions).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::CsrfTokenInvalid).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::UsernameTaken).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(FileValidationError::TooSmall).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
