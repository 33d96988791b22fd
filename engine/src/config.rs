//! Engine configuration.

use std::env;

/// Page size used by pulls when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Environment variable overriding [`SyncConfig::page_size`].
pub const PAGE_SIZE_VAR: &str = "TABLESYNC_PAGE_SIZE";

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Items requested per pull page
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let page_size = match lookup(PAGE_SIZE_VAR) {
            Some(raw) => parse_page_size(&raw)?,
            None => DEFAULT_PAGE_SIZE,
        };
        Ok(Self { page_size })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

fn parse_page_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPageSize(raw.to_string())),
        Ok(n) => Ok(n),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {PAGE_SIZE_VAR} value: {0:?} (expected a positive integer)")]
    InvalidPageSize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = SyncConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn page_size_from_env() {
        let config = SyncConfig::from_lookup(|_| Some(" 200 ".into())).unwrap();
        assert_eq!(config.page_size, 200);
    }

    #[test]
    fn bad_page_size() {
        for raw in ["0", "-3", "lots"] {
            let err = SyncConfig::from_lookup(|_| Some(raw.into())).unwrap_err();
            assert_eq!(err, ConfigError::InvalidPageSize(raw.into()));
        }
    }
}
