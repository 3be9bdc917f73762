//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use asset_history_core::SyncConfig;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub mirror_url: Option<String>,
    pub mirror_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub sync: SyncConfig,
    pub admin_token: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Remote Mirror (optional) ---
        let mirror_url = lookup("MIRROR_URL").filter(|url| !url.trim().is_empty());
        let mirror_token = lookup("MIRROR_TOKEN");
        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            max_attempts: parse_or("SYNC_MAX_ATTEMPTS", &lookup, defaults.max_attempts)?,
            base_backoff: Duration::from_millis(parse_or(
                "SYNC_BASE_BACKOFF_MS",
                &lookup,
                defaults.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                "SYNC_MAX_BACKOFF_MS",
                &lookup,
                defaults.max_backoff.as_millis() as u64,
            )?),
        };

        // --- Generation Settings ---
        let openai_api_key = lookup("OPENAI_API_KEY");
        let text_model = lookup("TEXT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let image_model = lookup("IMAGE_MODEL").unwrap_or_else(|| "dall-e-3".to_string());

        let admin_token = lookup("ADMIN_TOKEN").filter(|token| !token.is_empty());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            mirror_url,
            mirror_token,
            openai_api_key,
            text_model,
            image_model,
            sync,
            admin_token,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config = config_from(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.mirror_url.is_none());
        assert!(config.admin_token.is_none());
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.base_backoff, Duration::from_millis(500));
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(config_from(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config_from(&[("DATABASE_URL", "x"), ("SYNC_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "SYNC_MAX_ATTEMPTS"));
    }

    #[test]
    fn sync_settings_are_read() {
        let config = config_from(&[
            ("DATABASE_URL", "x"),
            ("MIRROR_URL", "https://mirror.example"),
            ("SYNC_MAX_ATTEMPTS", "2"),
            ("SYNC_BASE_BACKOFF_MS", "10"),
            ("SYNC_MAX_BACKOFF_MS", "40"),
        ])
        .unwrap();
        assert_eq!(config.mirror_url.as_deref(), Some("https://mirror.example"));
        assert_eq!(config.sync.max_attempts, 2);
        assert_eq!(config.sync.max_backoff, Duration::from_millis(40));
    }
}
