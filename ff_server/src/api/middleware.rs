//! Authentication middleware for protected endpoints.
//!
//! The access token comes from `Authorization: Bearer <token>` or, failing
//! that, the `access_token` cookie. A verified request carries an
//! [`AuthenticatedUser`] in its extensions for downstream handlers.
//!
//! # Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, middleware};
//! # use ff_server::api::middleware::require_auth;
//! # use ff_server::api::AppState;
//! # async fn handler() {}
//! # let state: AppState = unimplemented!();
//!
//! let protected_routes: Router = Router::new()
//!     .route("/api/protected", get(handler))
//!     .layer(middleware::from_fn_with_state(state.clone(), require_auth))
//!     .with_state(state);
//! # let _ = protected_routes;
//! ```

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use feedfinder::auth::{AuthError, ClientContext, UserId, UserRole};

use super::{AppState, cookies, error::ApiError};
use crate::logging::{SecurityEvent, log_security_event};
use crate::metrics;

const UNKNOWN: &str = "unknown";

/// Identity attached to a request by [`require_auth`] / [`optional_auth`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: String,
    /// Role as currently stored, not as it was at login
    pub role: UserRole,
    pub session_id: String,
}

/// Caller's network identity, for fingerprinting.
///
/// The peer address comes from `ConnectInfo`; requests without one (such as
/// in-process tests) report `"unknown"`.
#[derive(Debug, Clone)]
pub struct Client(pub ClientContext);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Client(client_context(
            &parts.headers,
            parts.extensions.get::<ConnectInfo<SocketAddr>>(),
        )))
    }
}

pub fn client_context(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> ClientContext {
    let ip_address = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(UNKNOWN);

    ClientContext::new(ip_address, user_agent)
}

/// Access token from the bearer header, else the access cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .or_else(|| cookies::cookie_value(headers, cookies::ACCESS_COOKIE))
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    client: &ClientContext,
) -> Result<AuthenticatedUser, AuthError> {
    let token = extract_token(headers).ok_or(AuthError::NoToken)?;

    let claims = state
        .auth_manager
        .sessions()
        .verify_access(&token, client)
        .await?;

    // A deleted account leaves no usable session behind
    let user = state
        .auth_manager
        .users()
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AuthError::SessionRevoked)?;

    Ok(AuthenticatedUser {
        user_id: user.id,
        username: user.username,
        role: user.role,
        session_id: claims.session_id,
    })
}

fn record_rejection(err: &AuthError, client: &ClientContext) {
    if !err.is_token_failure() {
        return;
    }

    metrics::token_rejections_total(err.code());
    match err {
        AuthError::FingerprintMismatch => log_security_event(
            SecurityEvent::FingerprintMismatch,
            None,
            Some(&client.ip_address),
            "Token presented from a different device",
        ),
        AuthError::SessionRevoked => log_security_event(
            SecurityEvent::SessionRevoked,
            None,
            Some(&client.ip_address),
            "Token for a revoked or expired session",
        ),
        _ => {}
    }
}

/// Reject the request unless it carries a valid access token.
///
/// # Behavior
///
/// - **Success**: injects [`AuthenticatedUser`] and calls the next handler
/// - **No token**: `401 NO_TOKEN`
/// - **Bad token or session**: `401` "Invalid or expired session" with the specific code
/// - **Storage failure**: `503 STORAGE_UNAVAILABLE`
pub async fn require_auth(
    State(state): State<AppState>,
    Client(client): Client,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match authenticate(&state, request.headers(), &client).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(err) => {
            record_rejection(&err, &client);
            Err(err.into())
        }
    }
}

/// Attach `Option<AuthenticatedUser>`; never rejects.
pub async fn optional_auth(
    State(state): State<AppState>,
    Client(client): Client,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match authenticate(&state, request.headers(), &client).await {
        Ok(user) => Some(user),
        Err(AuthError::NoToken) => None,
        Err(err) => {
            tracing::debug!(code = err.code(), "Ignoring unusable token on optional route");
            None
        }
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Reject non-admins with `403 INSUFFICIENT_PERMISSIONS`.
///
/// Must run inside [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<AuthenticatedUser>()
        .is_some_and(|user| user.role.is_admin());

    if !is_admin {
        return Err(AuthError::InsufficientPermissions.into());
    }

    Ok(next.run(request).await)
}
