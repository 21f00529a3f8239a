//! Configuration loading from the environment.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: u64 = 200;
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration of the recalculation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcConfig {
    /// Items per batch.
    pub batch_size: u64,
    pub watchdog_interval: Duration,
    /// Executor poll interval when the queue is empty.
    pub poll_interval: Duration,
    /// Attempts per batch task before it is dead-lettered.
    pub max_attempts: u32,
    /// JSON state file; `None` keeps state in memory.
    pub state_path: Option<PathBuf>,
    /// JSON catalog seed; `None` starts with an empty catalog.
    pub catalog_path: Option<PathBuf>,
    pub bind_addr: String,
    /// Bearer token required by the admin endpoints; `None` leaves them open.
    pub admin_token: Option<String>,
    /// Postgres connection string for the state store (`postgres` feature).
    pub database_url: Option<String>,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            state_path: None,
            catalog_path: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            admin_token: None,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl RecalcConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (tests use a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let batch_size = parse_positive(&lookup, "RECALC_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        let watchdog_interval = parse_positive(&lookup, "RECALC_WATCHDOG_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.watchdog_interval);
        let poll_interval = parse_positive(&lookup, "RECALC_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_attempts = match parse_positive(&lookup, "RECALC_MAX_ATTEMPTS")? {
            Some(n) => u32::try_from(n).map_err(|e| ConfigError::Invalid {
                var: "RECALC_MAX_ATTEMPTS",
                value: n.to_string(),
                reason: e.to_string(),
            })?,
            None => defaults.max_attempts,
        };

        Ok(Self {
            batch_size,
            watchdog_interval,
            poll_interval,
            max_attempts,
            state_path: non_empty(&lookup, "RECALC_STATE_PATH").map(PathBuf::from),
            catalog_path: non_empty(&lookup, "RECALC_CATALOG_PATH").map(PathBuf::from),
            bind_addr: non_empty(&lookup, "RECALC_BIND_ADDR").unwrap_or(defaults.bind_addr),
            admin_token: non_empty(&lookup, "RECALC_ADMIN_TOKEN"),
            database_url: non_empty(&lookup, "DATABASE_URL"),
        })
    }
}

fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, var) else {
        return Ok(None);
    };

    let value = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })?;

    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(Some(value))
}
