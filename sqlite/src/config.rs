//! Configuration for the SQLite data source.

use std::env;

/// Database settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite connection URL
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tablesync.db".to_string(),
            max_connections: 4,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url =
            env::var("TABLESYNC_DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = match env::var("TABLESYNC_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections)?,
            Err(_) => defaults.max_connections,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TABLESYNC_MAX_CONNECTIONS value")]
    InvalidMaxConnections,
}
