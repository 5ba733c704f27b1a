//! Store configuration loaded from environment variables.

use std::env;
use std::time::Duration;

/// Which store adapter to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { url: String },
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Pool size (Postgres only).
    pub max_connections: u32,
    /// Upper bound on any lock wait inside a unit of work. Never zero.
    pub lock_timeout: Duration,
    /// How long to wait for a pooled connection (Postgres only).
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

    /// Load configuration from the process environment.
    ///
    /// `STOCKLEDGER_DATABASE_URL` (or `DATABASE_URL`) selects Postgres; without
    /// either the in-memory store is used.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("STOCKLEDGER_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.trim().is_empty());

        let backend = match url {
            Some(url) => StoreBackend::Postgres { url },
            None => StoreBackend::InMemory,
        };

        let max_connections = match lookup("STOCKLEDGER_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConnections(raw)),
            },
            None => Self::DEFAULT_MAX_CONNECTIONS,
        };

        // Postgres reads a zero lock_timeout as "wait forever".
        let lock_timeout_ms = match lookup("STOCKLEDGER_LOCK_TIMEOUT_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => return Err(ConfigError::InvalidLockTimeout(raw)),
            },
            None => Self::DEFAULT_LOCK_TIMEOUT_MS,
        };

        let acquire_timeout_ms = match lookup("STOCKLEDGER_ACQUIRE_TIMEOUT_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => return Err(ConfigError::InvalidAcquireTimeout(raw)),
            },
            None => Self::DEFAULT_ACQUIRE_TIMEOUT_MS,
        };

        Ok(Self {
            backend,
            max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
        })
    }

    /// In-memory backend with default limits.
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::InMemory,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            lock_timeout: Duration::from_millis(Self::DEFAULT_LOCK_TIMEOUT_MS),
            acquire_timeout: Duration::from_millis(Self::DEFAULT_ACQUIRE_TIMEOUT_MS),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid STOCKLEDGER_MAX_CONNECTIONS value: {0:?}")]
    InvalidMaxConnections(String),

    #[error("invalid STOCKLEDGER_LOCK_TIMEOUT_MS value: {0:?}")]
    InvalidLockTimeout(String),

    #[error("invalid STOCKLEDGER_ACQUIRE_TIMEOUT_MS value: {0:?}")]
    InvalidAcquireTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_selects_in_memory_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn prefixed_url_wins_over_generic_one() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_DATABASE_URL", "postgres://a/inv"),
            ("DATABASE_URL", "postgres://b/other"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            StoreBackend::Postgres {
                url: "postgres://a/inv".to_string()
            }
        );

        let config =
            StoreConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://b/other")])).unwrap();
        assert!(matches!(config.backend, StoreBackend::Postgres { .. }));
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_MAX_CONNECTIONS", "3"),
            ("STOCKLEDGER_LOCK_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[("STOCKLEDGER_MAX_CONNECTIONS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxConnections(_)));

        let err = StoreConfig::from_lookup(lookup(&[("STOCKLEDGER_LOCK_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLockTimeout(_)));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[("STOCKLEDGER_LOCK_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLockTimeout(ref raw) if raw == "0"));

        let err = StoreConfig::from_lookup(lookup(&[("STOCKLEDGER_ACQUIRE_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAcquireTimeout(_)));
    }

    #[test]
    fn acquire_timeout_is_independent_of_lock_timeout() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_LOCK_TIMEOUT_MS", "1"),
            ("STOCKLEDGER_ACQUIRE_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(1));
        assert_eq!(config.acquire_timeout, Duration::from_millis(1500));

        let config = StoreConfig::from_lookup(lookup(&[("STOCKLEDGER_LOCK_TIMEOUT_MS", "1")]))
            .unwrap();
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }
}
