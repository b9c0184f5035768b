use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use openid_login::OpenIdSettings;
use openid_login_postgres::PostgresConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: PostgresConfig,
    /// Where the browser goes once a login attempt ends.
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// OpenID providers and feature flag.
    #[serde(default)]
    pub open_id: OpenIdSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.database.url.is_empty() {
            return Err("database.url must not be empty".into());
        }
        if self.database.pool_size == 0 {
            return Err("database.pool_size must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        for (name, value) in [
            ("login.destination", &self.login.destination),
            ("login.failure_destination", &self.login.failure_destination),
        ] {
            if !value.starts_with('/') {
                return Err(format!("{name} must be a local path starting with '/'"));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mark the session cookie `Secure`. Turn off only for plain-HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_secure_cookies() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default = "default_failure_destination")]
    pub failure_destination: String,
}

fn default_destination() -> String {
    "/core/dashboard".into()
}
fn default_failure_destination() -> String {
    "/login.php".into()
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            failure_destination: default_failure_destination(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "openid-login.toml";

    /// Errors raised while loading the configuration.
    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("config build error: {0}")]
        Build(#[from] config::ConfigError),
        #[error("invalid configuration: {0}")]
        Invalid(String),
    }

    /// Loads the file at `path` (or the default file) and applies
    /// `OPENID_LOGIN__SECTION__KEY` environment overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, LoadError> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OPENID_LOGIN__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("OPENID_LOGIN")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate().map_err(LoadError::Invalid)?;
        Ok(merged)
    }
}
