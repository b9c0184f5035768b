//! PostgreSQL identity store for openid-login.
//!
//! Looks up local accounts in the `v_users` table, joined with `v_domains`
//! for the domain name. Only the mapped column and the enabled flag are
//! consulted.
//!
//! # Example
//!
//! ```ignore
//! use openid_login_postgres::{PostgresConfig, PostgresIdentityStore, create_pool};
//!
//! let pool = create_pool(&PostgresConfig::new("postgres://localhost/pbx")).await?;
//! let store = PostgresIdentityStore::new(pool);
//! ```

pub mod identity;

use std::time::Duration;

use serde::Deserialize;
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;
use tracing::{debug, info, instrument};

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use identity::PostgresIdentityStore;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while talking to PostgreSQL.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// A column name was not a plain SQL identifier.
    #[error("Invalid column name: {0}")]
    InvalidColumn(String),
}

impl From<PostgresError> for openid_login::StorageError {
    fn from(e: PostgresError) -> Self {
        openid_login::StorageError::Database(e.to_string())
    }
}

/// Result type for PostgreSQL operations.
pub type PostgresResult<T> = Result<T, PostgresError>;

// =============================================================================
// Connection Pool
// =============================================================================

/// Connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection URL.
    pub url: String,
    /// Maximum number of pooled connections.
    pub pool_size: u32,
    /// Time to wait for a free connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connections are closed after this many milliseconds.
    pub idle_timeout_ms: Option<u64>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost/fusionpbx".to_string(),
            pool_size: 5,
            connect_timeout_ms: 5000,
            idle_timeout_ms: None,
        }
    }
}

impl PostgresConfig {
    /// Settings with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Creates a connection pool.
///
/// # Errors
///
/// Returns an error if the first connection cannot be established.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> PostgresResult<PgPool> {
    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Creating PostgreSQL connection pool"
    );

    let mut options = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));
    if let Some(idle_timeout) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;
    debug!("PostgreSQL connection pool created");
    Ok(pool)
}

/// Masks the password in a database URL for logging.
fn mask_password(url: &str) -> String {
    let Some(at_pos) = url.find('@') else {
        return url.to_string();
    };
    let scheme_end = url.find("://").map_or(0, |p| p + 3);
    match url[..at_pos].rfind(':') {
        Some(colon_pos) if colon_pos > scheme_end => {
            format!("{}:****{}", &url[..colon_pos], &url[at_pos..])
        }
        _ => url.to_string(),
    }
}
