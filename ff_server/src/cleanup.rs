//! Background cleanup of expired auth state.
//!
//! Sessions, CSRF tokens and two-factor challenges all expire on their own
//! clock; this job periodically deletes what has lapsed so the stores stay
//! small. It is the only background task the server runs.

use std::sync::Arc;
use std::time::Duration;

use feedfinder::AuthResult;
use feedfinder::auth::AuthManager;
use feedfinder::security::CsrfProtection;
use serde::Serialize;

use crate::metrics;

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions: u64,
    pub csrf_tokens: u64,
    pub challenges: u64,
}

/// Run the cleanup loop.
///
/// Sweeps every `interval`; a failed sweep is logged and retried on the
/// next tick.
pub async fn run_cleanup_loop(
    auth: Arc<AuthManager>,
    csrf: Arc<CsrfProtection>,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;

        if let Err(e) = sweep_once(&auth, &csrf).await {
            tracing::error!(error = %e, "Cleanup job failed");
        }
    }
}

/// Delete expired sessions, CSRF tokens and two-factor challenges.
pub async fn sweep_once(auth: &AuthManager, csrf: &CsrfProtection) -> AuthResult<SweepReport> {
    let sessions = auth.sessions().sweep().await?;
    let csrf_tokens = csrf.purge_expired().await?;
    let challenges = match auth.two_factor() {
        Some(two_factor) => two_factor.purge_expired().await?,
        None => 0,
    };

    metrics::sweep_completed(sessions);

    let report = SweepReport {
        sessions,
        csrf_tokens,
        challenges,
    };
    if report != SweepReport::default() {
        tracing::info!(
            sessions = report.sessions,
            csrf_tokens = report.csrf_tokens,
            challenges = report.challenges,
            "Cleanup complete"
        );
    }

    Ok(report)
}
