//! CSRF token exchange.
//!
//! A browser first calls `GET /api/v1/auth/csrf-token`, which pins a random
//! key in the `csrf_session` cookie and returns the token bound to it. Every
//! state-changing request to a protected route must then echo that token in
//! the `X-CSRF-Token` header.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, header::SET_COOKIE},
    middleware::Next,
    response::{AppendHeaders, IntoResponse, Response},
};
use feedfinder::AuthError;
use feedfinder::security::random_token;
use serde_json::json;

use super::{AppState, cookies, error::ApiError, middleware::Client};
use crate::logging::{SecurityEvent, log_security_event};
use crate::metrics;

pub const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

const CSRF_KEY_BYTES: usize = 32;

/// Issue (or re-issue) the CSRF token for this browser
///
/// # Response
///
/// ```json
/// { "success": true, "csrf_token": "..." }
/// ```
///
/// The token is also returned in the `X-CSRF-Token` header, and a
/// `csrf_session` cookie is set when the browser had none.
pub async fn get_csrf_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let existing = cookies::cookie_value(&headers, cookies::CSRF_SESSION_COOKIE);
    let key = existing
        .clone()
        .unwrap_or_else(|| random_token(CSRF_KEY_BYTES));

    let token = state.csrf.generate(&key).await?;

    let mut response = (
        [(CSRF_HEADER, token.clone())],
        Json(json!({ "success": true, "csrf_token": token })),
    )
        .into_response();

    if existing.is_none() {
        let cookie = cookies::build_session_cookie(
            cookies::CSRF_SESSION_COOKIE,
            &key,
            state.settings.cookie_secure,
        );
        response = (AppendHeaders([(SET_COOKIE, cookie)]), response).into_response();
    }

    Ok(response)
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Require a valid `X-CSRF-Token` on state-changing requests.
///
/// Rejects with `403 CSRF_TOKEN_INVALID`.
pub async fn require_csrf(
    State(state): State<AppState>,
    Client(client): Client,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_safe_method(request.method()) {
        return Ok(next.run(request).await);
    }

    let key = cookies::cookie_value(request.headers(), cookies::CSRF_SESSION_COOKIE);
    let submitted = request
        .headers()
        .get(&CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let valid = match (key, submitted) {
        (Some(key), Some(submitted)) => state.csrf.validate(&key, &submitted).await?,
        _ => false,
    };

    if !valid {
        metrics::csrf_rejections_total();
        log_security_event(
            SecurityEvent::CsrfRejected,
            None,
            Some(&client.ip_address),
            &format!("{} {} without a valid CSRF token", request.method(), request.uri().path()),
        );
        return Err(AuthError::CsrfTokenInvalid.into());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }
}
