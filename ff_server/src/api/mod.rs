//! HTTP API for the FeedFinder auth server.
//!
//! # Modules
//!
//! - [`auth`]: registration, login, two-factor, refresh, logout, password change
//! - [`csrf`]: CSRF token issue and enforcement
//! - [`uploads`]: validated media uploads
//! - [`admin`]: session revocation and manual sweeps
//! - [`middleware`]: the auth gate (`require_auth`, `optional_auth`, `require_admin`)
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ff_server::api::{create_router, AppState};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let state: AppState = unimplemented!();
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(
//!     listener,
//!     app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Serve with connect info: the peer address is half of the device
//! fingerprint, and without it every client reports `"unknown"`.

pub mod admin;
pub mod auth;
pub mod cookies;
pub mod csrf;
pub mod error;
pub mod middleware;
pub mod request_id;
pub mod uploads;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{
        HeaderName, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post},
};
use feedfinder::auth::AuthManager;
use feedfinder::security::CsrfProtection;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
};

/// HTTP-level settings shared by handlers
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Whether auth cookies carry the `Secure` attribute
    pub cookie_secure: bool,
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,
    /// CORS origins allowed to send credentials
    pub allowed_origins: Vec<String>,
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub csrf: Arc<CsrfProtection>,
    pub settings: Arc<ApiSettings>,
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Endpoint Summary
///
/// ```text
/// GET  /health                                      - Health check
/// GET  /api/v1/auth/csrf-token                      - Issue CSRF token
/// POST /api/v1/auth/register                        - Register and log in
/// POST /api/v1/auth/login                           - Password login
/// POST /api/v1/auth/verify-2fa                      - Finish login with mailed code
/// POST /api/v1/auth/refresh                         - New access token
/// POST /api/v1/auth/logout                          - End session (auth + csrf)
/// POST /api/v1/auth/logout-all                      - End all sessions (auth + csrf)
/// POST /api/v1/auth/change-password                 - Change password (auth + csrf)
/// GET  /api/v1/auth/me                              - Current user (optional auth)
/// GET  /api/v1/auth/sessions                        - Active sessions (auth)
/// POST /api/v1/uploads                              - Upload media (auth + csrf)
/// POST /api/v1/admin/users/{id}/revoke-sessions     - Revoke a user's sessions (admin)
/// POST /api/v1/admin/sessions/sweep                 - Run cleanup now (admin)
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(from_fn(request_id::request_id_middleware))
        .layer(cors_layer(&state.settings.allowed_origins))
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/auth/csrf-token", get(csrf::get_csrf_token))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-2fa", post(auth::verify_two_factor))
        .route("/auth/refresh", post(auth::refresh));

    let optional_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .layer(from_fn_with_state(state.clone(), middleware::optional_auth));

    // Layers run bottom-up: auth first, then CSRF
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/sessions", get(auth::sessions))
        .route(
            "/uploads",
            post(uploads::upload)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(state.settings.upload_max_bytes)),
        )
        .layer(from_fn_with_state(state.clone(), csrf::require_csrf))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let admin_routes = Router::new()
        .route(
            "/admin/users/{user_id}/revoke-sessions",
            post(admin::revoke_sessions),
        )
        .route("/admin/sessions/sweep", post(admin::sweep))
        .layer(from_fn_with_state(state.clone(), csrf::require_csrf))
        .layer(from_fn(middleware::require_admin))
        .layer(from_fn_with_state(state, middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(optional_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, csrf::CSRF_HEADER])
        .expose_headers([
            csrf::CSRF_HEADER,
            HeaderName::from_static(request_id::REQUEST_ID_HEADER),
        ])
        .allow_credentials(true)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the session store answers, `503 Service Unavailable`
/// otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","version":"0.4.0","storage":true,"timestamp":"2025-11-22T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_healthy = state
        .auth_manager
        .sessions()
        .store()
        .health_check()
        .await
        .is_ok();

    let status_code = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if storage_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
