//! # configs
//!
//! Layered settings for the server and the seeding tool.
//!
//! Precedence, lowest first: built-in defaults, `config/agora.toml` (optional),
//! then `AGORA__SECTION__KEY` environment variables. A `.env` file in the
//! working directory is folded into the environment before loading.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "AGORA";
pub const CONFIG_FILE: &str = "config/agora";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub media: MediaSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub backend: Backend,
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: SecretString,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSettings {
    pub upload_dir: String,
    pub url_prefix: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.auth.jwt_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Invalid("auth.jwt_secret must be set".into()));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid("auth.token_ttl_hours must be positive".into()));
        }
        if self.database.backend == Backend::Postgres
            && self.database.url.expose_secret().trim().is_empty()
        {
            return Err(ConfigError::Invalid("database.url is required for postgres".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }
        if !self.media.url_prefix.starts_with('/') {
            return Err(ConfigError::Invalid("media.url_prefix must start with '/'".into()));
        }
        Ok(self)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5000)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("database.backend", "postgres")?
        .set_default("database.url", "")?
        .set_default("database.max_connections", 10)?
        .set_default("auth.jwt_secret", "")?
        .set_default("auth.token_ttl_hours", 720)?
        .set_default("media.upload_dir", "./uploads")?
        .set_default("media.url_prefix", "/uploads")?
        .set_default("media.max_upload_bytes", 50 * 1024 * 1024)?
        .set_default("log.filter", "info")?
        .set_default("log.format", "pretty")?)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()
}

/// Loads `.env`, the optional config file and the environment.
pub fn load() -> Result<Settings, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), ".env loaded"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(ConfigError::Invalid(format!(".env: {e}"))),
    }

    let builder = defaults()?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );
    finish(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(overrides: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut builder = defaults()?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        finish(builder)
    }

    #[test]
    fn defaults_need_only_secrets() {
        let settings = with(&[
            ("auth.jwt_secret", "s3cret"),
            ("database.url", "postgres://localhost/agora"),
        ])
        .unwrap();
        assert_eq!(settings.bind_addr(), "0.0.0.0:5000");
        assert_eq!(settings.auth.token_ttl_hours, 720);
        assert_eq!(settings.database.backend, Backend::Postgres);
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert!(settings.server.cors_origins.is_empty());
    }

    #[test]
    fn missing_jwt_secret_is_rejected() {
        let err = with(&[("database.url", "postgres://localhost/agora")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("jwt_secret")));
    }

    #[test]
    fn memory_backend_needs_no_database_url() {
        let settings = with(&[("auth.jwt_secret", "x"), ("database.backend", "memory")]).unwrap();
        assert_eq!(settings.database.backend, Backend::Memory);
    }

    #[test]
    fn unknown_backend_fails_to_load() {
        let err = with(&[("auth.jwt_secret", "x"), ("database.backend", "mongo")]).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
