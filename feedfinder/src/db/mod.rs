//! Database module providing PostgreSQL connection pooling and the
//! row stores behind the auth core.
//!
//! The traits the core depends on ([`UserRepository`],
//! [`crate::session::SessionStore`], [`crate::auth::ChallengeStore`],
//! [`crate::security::CsrfStore`]) each have a PostgreSQL implementation
//! here and an in-memory one for tests.

use sqlx::postgres::PgPool;

pub mod config;
pub mod memory;
pub mod repository;

pub use config::DatabaseConfig;
pub use memory::MemoryUserRepository;
pub use repository::{
    PgChallengeStore, PgCsrfStore, PgSessionStore, PgUserRepository, UserRepository,
};

/// Schema applied by [`Database::migrate`]
pub const SCHEMA: &str = include_str!("../../migrations/001_auth_schema.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool described by `config`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use feedfinder::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let config = DatabaseConfig::new("postgres://localhost/feedfinder");
    ///     let db = Database::new(&config).await?;
    ///     db.migrate().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = config
            .pool_options()
            .connect(&config.database_url)
            .await?;
        log::info!(
            "Connected to database (pool {}..{})",
            config.min_connections,
            config.max_connections
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create any missing tables and indexes
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        log::info!("Database schema up to date");
        Ok(())
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections, then close the pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
