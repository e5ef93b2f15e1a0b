//! FeedFinder auth server.
//!
//! Serves the registration, login, session and upload API over PostgreSQL,
//! or over in-memory stores with `--memory` for local development.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use chrono::Duration;
use feedfinder::auth::{AuthManager, ChallengeStore, MemoryChallengeStore, TwoFactorService};
use feedfinder::db::{
    Database, MemoryUserRepository, PgChallengeStore, PgCsrfStore, PgSessionStore,
    PgUserRepository, UserRepository,
};
use feedfinder::mail::{LogMailer, Mailer, SmtpMailer};
use feedfinder::security::{CsrfProtection, CsrfStore, MemoryCsrfStore};
use feedfinder::session::{MemorySessionStore, SessionManager, SessionStore, TokenCodec};
use ff_server::api::{self, ApiSettings, AppState};
use ff_server::{cleanup, config::ServerConfig, logging, metrics};
use log::info;
use pico_args::Arguments;

const HELP: &str = "\
Run the FeedFinder auth server

USAGE:
  ff_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep users and sessions in memory (development only)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               JWT signing secret, at least 32 characters (required)
  SMTP_HOST                SMTP relay for verification codes
  (Variables may also be placed in a .env file)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

/// Stores behind the managers
struct Stores {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionStore>,
    challenges: Arc<dyn ChallengeStore>,
    csrf_tokens: Arc<dyn CsrfStore>,
    database: Option<Database>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Metrics exported at http://{addr}/metrics");
    }

    let stores = if args.memory {
        log::warn!("Using in-memory stores; all accounts are lost on exit");
        Stores {
            users: Arc::new(MemoryUserRepository::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            challenges: Arc::new(MemoryChallengeStore::new()),
            csrf_tokens: Arc::new(MemoryCsrfStore::new()),
            database: None,
        }
    } else {
        info!("Connecting to database");
        let db = Database::new(&config.database)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to apply schema")?;
        info!("Database connected successfully");

        let pool = db.pool().clone();
        Stores {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            challenges: Arc::new(PgChallengeStore::new(pool.clone())),
            csrf_tokens: Arc::new(PgCsrfStore::new(pool)),
            database: Some(db),
        }
    };

    let security = &config.security;
    let codec = TokenCodec::with_lifetimes(
        &security.jwt_secret,
        Duration::seconds(security.access_token_ttl_secs),
        Duration::seconds(security.refresh_token_ttl_secs),
    );
    let session_manager = SessionManager::new(codec, stores.sessions, stores.users.clone())
        .with_session_ttl(Duration::seconds(security.session_ttl_secs));

    let two_factor = if config.two_factor.enabled {
        let mailer: Arc<dyn Mailer> = match &config.two_factor.smtp {
            Some(smtp) => Arc::new(
                SmtpMailer::new(smtp.clone()).context("Failed to configure SMTP transport")?,
            ),
            None => {
                log::warn!("SMTP_HOST not set; verification codes will not be delivered");
                Arc::new(LogMailer::new())
            }
        };
        Some(
            TwoFactorService::new(stores.challenges, mailer)
                .with_ttl(Duration::seconds(config.two_factor.code_ttl_secs)),
        )
    } else {
        None
    };

    let auth_manager = Arc::new(AuthManager::new(stores.users, session_manager, two_factor));
    let csrf = Arc::new(CsrfProtection::with_ttl(
        stores.csrf_tokens,
        Duration::seconds(security.csrf_ttl_secs),
    ));

    tokio::spawn(cleanup::run_cleanup_loop(
        auth_manager.clone(),
        csrf.clone(),
        std::time::Duration::from_secs(config.sweep_interval_secs),
    ));

    let state = AppState {
        auth_manager,
        csrf,
        settings: Arc::new(ApiSettings {
            cookie_secure: config.http.cookie_secure,
            upload_dir: config.uploads.dir.clone(),
            upload_max_bytes: config.uploads.max_bytes,
            allowed_origins: config.http.allowed_origins.clone(),
        }),
    };

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = stores.database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}
