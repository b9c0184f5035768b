pub mod config;
pub mod observability;
pub mod routes;
pub mod server;
pub mod session;

use std::sync::Arc;

use openid_login::{ProviderRegistry, ReqwestTransport};
use openid_login_postgres::{PostgresIdentityStore, create_pool};

pub use config::AppConfig;
pub use observability::{apply_logging_level, init_tracing};
pub use routes::{AppState, login_routes};
pub use server::{LoginServer, build_app};
pub use session::SessionRegistry;

/// Connects the identity store and builds every configured provider.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let pool = create_pool(&cfg.database).await?;
    let store = Arc::new(PostgresIdentityStore::new(pool));
    let transport = Arc::new(ReqwestTransport::new(cfg.open_id.request_timeout)?);
    let registry = ProviderRegistry::from_settings(&cfg.open_id, transport, store).await?;

    Ok(AppState::new(
        registry,
        cfg.login.clone(),
        cfg.server.secure_cookies,
        cfg.open_id.attempt_ttl,
    ))
}
