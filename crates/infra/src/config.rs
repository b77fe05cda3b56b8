//! Environment-driven configuration for the ledger store and retry loop.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 1_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Upper bound on waiting for an inventory row lock.
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
}

impl LedgerConfig {
    /// Read configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_URL` | required |
    /// | `SHOPLEDGER_MAX_CONNECTIONS` | 10 |
    /// | `SHOPLEDGER_LOCK_TIMEOUT_MS` | 2000 |
    /// | `SHOPLEDGER_RETRY_MAX_ATTEMPTS` | 3 |
    /// | `SHOPLEDGER_RETRY_BASE_DELAY_MS` | 50 |
    /// | `SHOPLEDGER_RETRY_MAX_DELAY_MS` | 1000 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LedgerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections: u32 =
            parse_or(&lookup, "SHOPLEDGER_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "SHOPLEDGER_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let lock_timeout_ms = parse_or(&lookup, "SHOPLEDGER_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS)?;
        let max_attempts = parse_or(
            &lookup,
            "SHOPLEDGER_RETRY_MAX_ATTEMPTS",
            DEFAULT_RETRY_MAX_ATTEMPTS,
        )?;
        let base_delay_ms = parse_or(
            &lookup,
            "SHOPLEDGER_RETRY_BASE_DELAY_MS",
            DEFAULT_RETRY_BASE_DELAY_MS,
        )?;
        let max_delay_ms = parse_or(
            &lookup,
            "SHOPLEDGER_RETRY_MAX_DELAY_MS",
            DEFAULT_RETRY_MAX_DELAY_MS,
        )?;
        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::Invalid {
                key: "SHOPLEDGER_RETRY_MAX_DELAY_MS",
                value: max_delay_ms.to_string(),
                reason: format!("must be >= SHOPLEDGER_RETRY_BASE_DELAY_MS ({base_delay_ms})"),
            });
        }

        Ok(Self {
            database_url,
            max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            retry: RetryPolicy::exponential(
                max_attempts,
                Duration::from_millis(base_delay_ms),
                Duration::from_millis(max_delay_ms),
            ),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => {
            tracing::warn!(key, "not set; using default");
            Ok(default)
        }
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let cfg = LedgerConfig::from_lookup(env(&[("DATABASE_URL", "postgres://localhost/shop")]))
            .unwrap();
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
        assert_eq!(cfg.retry.max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS));
        assert_eq!(cfg.retry.max_delay, Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert_eq!(
            LedgerConfig::from_lookup(env(&[])).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn unparsable_values_are_reported_with_their_key() {
        let err = LedgerConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("SHOPLEDGER_LOCK_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "SHOPLEDGER_LOCK_TIMEOUT_MS", .. }
        ));
    }

    #[test]
    fn zero_connections_and_inverted_delays_are_rejected() {
        let zero = LedgerConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("SHOPLEDGER_MAX_CONNECTIONS", "0"),
        ]));
        assert!(zero.is_err());

        let inverted = LedgerConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("SHOPLEDGER_RETRY_BASE_DELAY_MS", "500"),
            ("SHOPLEDGER_RETRY_MAX_DELAY_MS", "100"),
        ]));
        assert!(inverted.is_err());
    }
}
