//! Daemon configuration.
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use std::env;
use std::time::Duration;

use eventline_infra::outbox::{
    ConfigError, ConsumerConfig, DEFAULT_BATCH_SIZE, DEFAULT_LOCK_TIMEOUT, SIDEKIQ5_FORMAT,
};

pub const DATABASE_URL: &str = "EVENTLINE_DATABASE_URL";
pub const REDIS_URL: &str = "EVENTLINE_REDIS_URL";
pub const SPLIT_KEYS: &str = "EVENTLINE_SPLIT_KEYS";
pub const MESSAGE_FORMAT: &str = "EVENTLINE_MESSAGE_FORMAT";
pub const BATCH_SIZE: &str = "EVENTLINE_BATCH_SIZE";
pub const LOCK_TIMEOUT_MS: &str = "EVENTLINE_LOCK_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxSettings {
    pub database_url: String,
    pub redis_url: String,
    /// `None` relays every split key.
    pub split_keys: Option<Vec<String>>,
    pub message_format: String,
    pub batch_size: usize,
    pub lock_timeout: Duration,
}

impl OutboxSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let split_keys = lookup(SPLIT_KEYS).and_then(|raw| {
            let keys: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            (!keys.is_empty()).then_some(keys)
        });

        let message_format = lookup(MESSAGE_FORMAT).unwrap_or_else(|| SIDEKIQ5_FORMAT.to_string());
        if message_format != SIDEKIQ5_FORMAT {
            return Err(ConfigError::UnsupportedFormat(message_format));
        }

        let batch_size = parse_or(&lookup, BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        let lock_timeout_ms = parse_or(&lookup, LOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT.as_millis() as u64)?;

        Ok(Self {
            database_url: required(DATABASE_URL)?,
            redis_url: required(REDIS_URL)?,
            split_keys,
            message_format,
            batch_size,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        let config = ConsumerConfig::default()
            .with_message_format(self.message_format.clone())
            .with_batch_size(self.batch_size);
        match &self.split_keys {
            Some(keys) => config.with_split_keys(keys.iter().cloned()),
            None => config.with_all_split_keys(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {e}"),
        }),
    }
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

    const BASE: [(&str, &str); 2] = [
        (DATABASE_URL, "postgres://localhost/eventline"),
        (REDIS_URL, "redis://localhost:6379"),
    ];

    #[test]
    fn defaults_apply() {
        let settings = OutboxSettings::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(settings.split_keys, None);
        assert_eq!(settings.message_format, "sidekiq5");
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.lock_timeout, Duration::from_secs(1));
        assert_eq!(settings.consumer_config().split_keys, None);
    }

    #[test]
    fn split_keys_are_comma_separated() {
        let mut vars = BASE.to_vec();
        vars.push((SPLIT_KEYS, "default, mailers,,"));
        let settings = OutboxSettings::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            settings.split_keys,
            Some(vec!["default".to_string(), "mailers".to_string()])
        );

        let mut vars = BASE.to_vec();
        vars.push((SPLIT_KEYS, " "));
        let settings = OutboxSettings::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(settings.split_keys, None);
    }

    #[test]
    fn only_sidekiq5_is_accepted() {
        let mut vars = BASE.to_vec();
        vars.push((MESSAGE_FORMAT, "sidekiq7"));
        assert_eq!(
            OutboxSettings::from_lookup(lookup(&vars)).unwrap_err(),
            ConfigError::UnsupportedFormat("sidekiq7".to_string())
        );
    }

    #[test]
    fn missing_and_malformed_values_are_reported() {
        assert_eq!(
            OutboxSettings::from_lookup(lookup(&BASE[..1])).unwrap_err(),
            ConfigError::Missing(REDIS_URL)
        );

        let mut vars = BASE.to_vec();
        vars.push((BATCH_SIZE, "lots"));
        assert!(matches!(
            OutboxSettings::from_lookup(lookup(&vars)).unwrap_err(),
            ConfigError::Invalid { key: BATCH_SIZE, .. }
        ));

        let mut vars = BASE.to_vec();
        vars.push((BATCH_SIZE, "0"));
        assert_eq!(
            OutboxSettings::from_lookup(lookup(&vars)).unwrap_err(),
            ConfigError::InvalidBatchSize
        );
    }
}
