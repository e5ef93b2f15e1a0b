//! Structured logging configuration.
//!
//! The core library logs through the `log` facade; the subscriber installed
//! here picks those records up alongside the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Security events recorded through [`log_security_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    FailedLogin,
    FingerprintMismatch,
    SessionRevoked,
    CsrfRejected,
    UploadRejected,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::FailedLogin => "failed_login",
            SecurityEvent::FingerprintMismatch => "fingerprint_mismatch",
            SecurityEvent::SessionRevoked => "session_revoked",
            SecurityEvent::CsrfRejected => "csrf_rejected",
            SecurityEvent::UploadRejected => "upload_rejected",
        }
    }
}

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, defaulting to `info,sqlx=warn,hyper=warn`.
///
/// # Example
///
/// ```no_run
/// use ff_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Example
///
/// ```
/// use ff_server::logging::{SecurityEvent, log_security_event};
///
/// log_security_event(
///     SecurityEvent::FailedLogin,
///     None,
///     Some("192.168.1.1"),
///     "Invalid password attempt",
/// );
/// ```
pub fn log_security_event(
    event: SecurityEvent,
    user_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event.as_str(),
        user_id = user_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}
