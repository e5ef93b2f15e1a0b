//! Database pool configuration.
//!
//! Built by the server from `DATABASE_URL` and the `DB_*` variables; the
//! library itself never reads the environment.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

/// Connection pool settings for [`super::Database`]
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long `acquire` waits for a free connection
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Connections are recycled after this age
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    /// Pool settings suited to a single API instance, for the given URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }

    /// Local development database
    pub fn development() -> Self {
        Self::new("postgres://postgres@localhost/feedfinder")
    }

    pub(crate) fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(self.max_lifetime_secs))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}
