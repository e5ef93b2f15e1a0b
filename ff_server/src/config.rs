//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.
//! The core library never looks at the environment; everything it needs is
//! built from a [`ServerConfig`] at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use feedfinder::db::DatabaseConfig;
use feedfinder::mail::{DEFAULT_SMTP_PORT, MailConfig};

const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
const DEFAULT_UPLOAD_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Emailed verification codes
    pub two_factor: TwoFactorConfig,
    /// Browser-facing settings
    pub http: HttpConfig,
    /// Upload storage
    pub uploads: UploadConfig,
    /// Seconds between session sweeps
    pub sweep_interval_secs: u64,
    /// Prometheus scrape address, if metrics are enabled
    pub metrics_bind: Option<SocketAddr>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub session_ttl_secs: i64,
    pub csrf_ttl_secs: i64,
}

/// Two-factor configuration
#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub enabled: bool,
    pub code_ttl_secs: i64,
    /// SMTP relay; codes are only logged when absent
    pub smtp: Option<MailConfig>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// CORS origins; empty means same-origin only
    pub allowed_origins: Vec<String>,
    /// Whether auth cookies carry the `Secure` attribute
    pub cookie_secure: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(
            |key| std::env::var(key).ok(),
            bind_override,
            database_url_override,
        )
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(
        lookup: F,
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        // Bind address
        let bind = match bind_override {
            Some(bind) => bind,
            None => vars.parse_or("SERVER_BIND", DEFAULT_BIND)?,
        };

        // Database configuration
        let database_url = database_url_override
            .or_else(|| vars.get("DATABASE_URL"))
            .unwrap_or_else(|| DatabaseConfig::development().database_url);
        let pool_defaults = DatabaseConfig::new(database_url.clone());

        let database = DatabaseConfig {
            database_url,
            max_connections: vars.parse_or("DB_MAX_CONNECTIONS", pool_defaults.max_connections)?,
            min_connections: vars.parse_or("DB_MIN_CONNECTIONS", pool_defaults.min_connections)?,
            connection_timeout_secs: vars.parse_or(
                "DB_CONNECTION_TIMEOUT_SECS",
                pool_defaults.connection_timeout_secs,
            )?,
            idle_timeout_secs: vars
                .parse_or("DB_IDLE_TIMEOUT_SECS", pool_defaults.idle_timeout_secs)?,
            max_lifetime_secs: vars
                .parse_or("DB_MAX_LIFETIME_SECS", pool_defaults.max_lifetime_secs)?,
        };

        // Security configuration (REQUIRED)
        let jwt_secret = vars
            .get("JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingRequired {
                var: "JWT_SECRET".to_string(),
                hint: "Generate with: openssl rand -hex 32".to_string(),
            })?;

        let security = SecurityConfig {
            jwt_secret,
            access_token_ttl_secs: vars.parse_or("ACCESS_TOKEN_TTL_SECS", 3600)?,
            refresh_token_ttl_secs: vars.parse_or("REFRESH_TOKEN_TTL_SECS", 604_800)?,
            session_ttl_secs: vars.parse_or("SESSION_TTL_SECS", 86_400)?,
            csrf_ttl_secs: vars.parse_or("CSRF_TTL_SECS", 86_400)?,
        };

        let smtp = match vars.get("SMTP_HOST") {
            Some(smtp_host) => Some(MailConfig {
                smtp_host,
                smtp_port: vars.parse_or("SMTP_PORT", DEFAULT_SMTP_PORT)?,
                from_address: vars.get("SMTP_FROM").ok_or_else(|| {
                    ConfigError::MissingRequired {
                        var: "SMTP_FROM".to_string(),
                        hint: "Required when SMTP_HOST is set".to_string(),
                    }
                })?,
                smtp_user: vars.get("SMTP_USER"),
                smtp_password: vars.get("SMTP_PASSWORD"),
            }),
            None => None,
        };

        let two_factor = TwoFactorConfig {
            enabled: vars.parse_or("TWO_FACTOR_ENABLED", true)?,
            code_ttl_secs: vars.parse_or("TWO_FACTOR_TTL_SECS", 300)?,
            smtp,
        };

        let http = HttpConfig {
            allowed_origins: vars
                .get("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            cookie_secure: vars.parse_or("COOKIE_SECURE", true)?,
        };

        let uploads = UploadConfig {
            dir: vars
                .get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_bytes: vars.parse_or("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES)?,
        };

        let metrics_bind = match vars.get("METRICS_BIND") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("'{raw}' is not an IP:PORT address"),
            })?),
            None => None,
        };

        Ok(ServerConfig {
            bind,
            database,
            security,
            two_factor,
            http,
            uploads,
            sweep_interval_secs: vars.parse_or("SESSION_SWEEP_INTERVAL_SECS", 3600)?,
            metrics_bind,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        for (var, secs) in [
            ("ACCESS_TOKEN_TTL_SECS", self.security.access_token_ttl_secs),
            ("REFRESH_TOKEN_TTL_SECS", self.security.refresh_token_ttl_secs),
            ("SESSION_TTL_SECS", self.security.session_ttl_secs),
            ("CSRF_TTL_SECS", self.security.csrf_ttl_secs),
            ("TWO_FACTOR_TTL_SECS", self.two_factor.code_ttl_secs),
        ] {
            if secs <= 0 {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if self.security.refresh_token_ttl_secs < self.security.access_token_ttl_secs {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_TTL_SECS".to_string(),
                reason: format!(
                    "Must not be shorter than the access token lifetime ({}s)",
                    self.security.access_token_ttl_secs
                ),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SESSION_SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.uploads.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_MAX_BYTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a variable, falling back to `default` when unset.
    /// A set but unparsable value is an error rather than a silent default.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("Could not parse '{raw}'"),
            }),
            None => Ok(default),
        }
    }
}
