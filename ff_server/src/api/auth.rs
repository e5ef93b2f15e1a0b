//! Authentication API handlers.
//!
//! Registration, login (with the optional emailed code), token refresh,
//! password change and logout. Successful logins set the `access_token` and
//! `refresh_token` cookies and also return both tokens in the body for
//! non-browser clients.
//!
//! # Examples
//!
//! Register a new user:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/register \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "alice", "email": "alice@example.com",
//!        "password": "SecurePass123", "confirm_password": "SecurePass123"}'
//! ```
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "alice", "password": "SecurePass123"}'
//! ```

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use feedfinder::AuthError;
use feedfinder::auth::{
    LoginOutcome, LoginRequest, RegisterRequest, Session, SessionTokens, User,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    AppState, cookies,
    error::ApiError,
    middleware::{AuthenticatedUser, Client},
};
use crate::logging::{SecurityEvent, log_security_event};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct VerifyTwoFactorPayload {
    pub challenge_id: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshPayload {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordPayload {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
}

/// One row of `GET /auth/sessions`
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

impl SessionSummary {
    fn new(session: Session, current_session_id: &str) -> Self {
        Self {
            current: session.session_id == current_session_id,
            session_id: session.session_id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            last_accessed: session.last_accessed,
            expires_at: session.expires_at,
        }
    }
}

/// Response for a freshly created session, with its cookies
fn session_response(
    state: &AppState,
    status: StatusCode,
    user: User,
    tokens: SessionTokens,
) -> Response {
    metrics::sessions_created_total();

    let codec = state.auth_manager.sessions().codec();
    let cookies = cookies::session_cookies(
        &tokens,
        codec.access_ttl().num_seconds(),
        codec.refresh_ttl().num_seconds(),
        state.settings.cookie_secure,
    );

    let body = AuthResponse {
        success: true,
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        session_id: tokens.session_id,
    };

    (
        status,
        AppendHeaders(cookies.map(|cookie| (SET_COOKIE, cookie))),
        Json(body),
    )
        .into_response()
}

fn cleared_response(state: &AppState, body: serde_json::Value) -> Response {
    let cookies = cookies::clear_session_cookies(state.settings.cookie_secure);
    (
        AppendHeaders(cookies.map(|cookie| (SET_COOKIE, cookie))),
        Json(body),
    )
        .into_response()
}

/// Register a new user account and log them in.
///
/// # Response
///
/// `201 Created` with the user, both tokens and the session id.
///
/// # Errors
///
/// - `400 VALIDATION_ERROR`: bad username, email or password, or mismatched confirmation
/// - `409 USERNAME_TAKEN` / `409 EMAIL_TAKEN`
pub async fn register(
    State(state): State<AppState>,
    Client(client): Client,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let (user, tokens) = state.auth_manager.register(payload, &client).await?;
    tracing::info!(user_id = user.id, "User registered");
    Ok(session_response(&state, StatusCode::CREATED, user, tokens))
}

/// Authenticate with username and password.
///
/// # Response
///
/// - `200 OK` with tokens when no second factor is needed
/// - `202 Accepted` with `{"two_factor_required": true, "challenge_id"}`
///   when a code was mailed; finish at `POST /auth/verify-2fa`
///
/// # Errors
///
/// - `401 INVALID_CREDENTIALS`: unknown user or wrong password, indistinguishably
pub async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let username = payload.username.clone();

    match state.auth_manager.login(payload, &client).await {
        Ok(LoginOutcome::Authenticated { user, tokens }) => {
            metrics::login_attempts_total("success");
            Ok(session_response(&state, StatusCode::OK, user, tokens))
        }
        Ok(LoginOutcome::TwoFactorRequired { challenge_id }) => {
            metrics::login_attempts_total("two_factor_required");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "success": true,
                    "two_factor_required": true,
                    "challenge_id": challenge_id,
                    "message": "Verification code sent to your email",
                })),
            )
                .into_response())
        }
        Err(err) => {
            if matches!(err, AuthError::InvalidCredentials) {
                metrics::login_attempts_total("failure");
                log_security_event(
                    SecurityEvent::FailedLogin,
                    None,
                    Some(&client.ip_address),
                    &format!("Failed login for '{username}'"),
                );
            }
            Err(err.into())
        }
    }
}

/// Exchange a mailed code for a session.
///
/// # Errors
///
/// - `401 TWO_FACTOR_NOT_FOUND` / `TWO_FACTOR_EXPIRED` / `TWO_FACTOR_INCORRECT`
/// - `429 TWO_FACTOR_LOCKED`: too many wrong codes, log in again
pub async fn verify_two_factor(
    State(state): State<AppState>,
    Client(client): Client,
    Json(payload): Json<VerifyTwoFactorPayload>,
) -> Result<Response, ApiError> {
    let (user, tokens) = state
        .auth_manager
        .complete_two_factor(&payload.challenge_id, &payload.code, &client)
        .await?;
    metrics::login_attempts_total("success");
    Ok(session_response(&state, StatusCode::OK, user, tokens))
}

/// Mint a new access token from a refresh token.
///
/// The refresh token is read from the JSON body (`{"refresh_token": ...}`)
/// or, if absent, from the `refresh_token` cookie. The session must still be
/// active; the refresh token itself is not rotated.
pub async fn refresh(
    State(state): State<AppState>,
    Client(client): Client,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: RefreshPayload = if body.is_empty() {
        RefreshPayload::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };

    let refresh_token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .or_else(|| cookies::cookie_value(&headers, cookies::REFRESH_COOKIE))
        .ok_or(AuthError::NoToken)?;

    let access_token = match state
        .auth_manager
        .sessions()
        .refresh(&refresh_token, &client)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            if err.is_token_failure() {
                metrics::token_rejections_total(err.code());
            }
            return Err(err.into());
        }
    };

    let cookie = cookies::build_cookie(
        cookies::ACCESS_COOKIE,
        &access_token,
        state.auth_manager.sessions().codec().access_ttl().num_seconds(),
        state.settings.cookie_secure,
    );

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(json!({ "success": true, "access_token": access_token })),
    )
        .into_response())
}

/// End the current session and clear the auth cookies.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    state.auth_manager.logout(&auth.session_id).await?;
    tracing::info!(user_id = auth.user_id, "User logged out");
    Ok(cleared_response(
        &state,
        json!({ "success": true, "message": "Logged out" }),
    ))
}

/// End every session of the current user.
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    state.auth_manager.logout_everywhere(auth.user_id).await?;
    Ok(cleared_response(
        &state,
        json!({ "success": true, "message": "Logged out of all sessions" }),
    ))
}

/// Change the password, revoking every existing session.
///
/// Returns a fresh session for the calling device.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Client(client): Client,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<Response, ApiError> {
    let tokens = state
        .auth_manager
        .change_password(
            auth.user_id,
            &payload.current_password,
            &payload.new_password,
            &client,
        )
        .await?;

    let user = state
        .auth_manager
        .users()
        .find_by_id(auth.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    log_security_event(
        SecurityEvent::SessionRevoked,
        Some(auth.user_id),
        Some(&client.ip_address),
        "Password changed, all other sessions revoked",
    );
    Ok(session_response(&state, StatusCode::OK, user, tokens))
}

/// Current user, if any.
///
/// Never fails on a missing or stale token; reports `"authenticated": false`.
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<Option<AuthenticatedUser>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = match auth {
        Some(auth) => state.auth_manager.users().find_by_id(auth.user_id).await?,
        None => None,
    };

    Ok(Json(match user {
        Some(user) => json!({ "success": true, "authenticated": true, "user": user }),
        None => json!({ "success": true, "authenticated": false }),
    }))
}

/// Active sessions of the current user, newest first.
pub async fn sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions: Vec<SessionSummary> = state
        .auth_manager
        .sessions()
        .active_sessions(auth.user_id)
        .await?
        .into_iter()
        .map(|session| SessionSummary::new(session, &auth.session_id))
        .collect();

    Ok(Json(json!({ "success": true, "sessions": sessions })))
}
