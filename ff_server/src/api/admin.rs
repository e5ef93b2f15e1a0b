//! Administrative endpoints. Every route here sits behind `require_admin`.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use feedfinder::auth::UserId;
use serde_json::json;

use super::{AppState, error::ApiError, middleware::AuthenticatedUser};
use crate::cleanup;
use crate::logging::{SecurityEvent, log_security_event};

/// Revoke every session of one user.
pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let revoked = state
        .auth_manager
        .sessions()
        .invalidate_all(user_id)
        .await?;

    log_security_event(
        SecurityEvent::SessionRevoked,
        Some(user_id),
        None,
        &format!("{revoked} session(s) revoked by admin {}", admin.username),
    );

    Ok(Json(json!({ "success": true, "revoked": revoked })))
}

/// Run the periodic cleanup now.
pub async fn sweep(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let report = cleanup::sweep_once(&state.auth_manager, &state.csrf).await?;
    Ok(Json(json!({ "success": true, "removed": report })))
}
