//! Monitor configuration loaded from environment variables.
//!
//! | Env Var               | Default | Description                              |
//! |-----------------------|---------|------------------------------------------|
//! | `SIM_INTERVAL_MS`     | `2000`  | Simulation tick interval                 |
//! | `POLL_INTERVAL_MS`    | `5000`  | Live feed poll interval                  |
//! | `POLL_CONCURRENCY`    | `4`     | Max concurrent fetches per poll cycle    |
//! | `BACKOFF_MAX_RETRIES` | `5`     | Failures before an entity is suspended   |
//! | `BACKOFF_INITIAL_MS`  | `2000`  | First suspension length                  |
//! | `BACKOFF_MAX_MS`      | `60000` | Longest suspension, at most one day      |
//! | `HISTORY_LIMIT`       | `30`    | Points kept per history channel          |
//!
//! The daemon additionally needs [`FeedSettings`]: `FEED_BASE_URL`,
//! `ORG_ID` and `AUTH_TOKEN`, all required.

use std::str::FromStr;
use std::time::Duration;

use vitalwatch_core::backoff::{BackoffConfig, MAX_SUSPENSION};
use vitalwatch_core::record::DEFAULT_HISTORY_LIMIT;
use vitalwatch_core::types::DbId;

const DEFAULT_SIM_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_POLL_CONCURRENCY: usize = 4;

/// Shortest period the loops accept. Timers cannot tick on zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Timing, concurrency and backoff settings for a [`Monitor`](crate::Monitor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub sim_interval: Duration,
    pub poll_interval: Duration,
    /// Upper bound on fetches in flight during one poll cycle. At least 1.
    pub poll_concurrency: usize,
    pub backoff: BackoffConfig,
    pub history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sim_interval: Duration::from_millis(DEFAULT_SIM_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_concurrency: DEFAULT_POLL_CONCURRENCY,
            backoff: BackoffConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl MonitorConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = BackoffConfig::default();

        let poll_concurrency: usize =
            parse_or(&lookup, "POLL_CONCURRENCY", DEFAULT_POLL_CONCURRENCY)?;
        if poll_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_CONCURRENCY",
                value: "0".into(),
            });
        }

        let history_limit: usize = parse_or(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        if history_limit == 0 {
            return Err(ConfigError::Invalid {
                var: "HISTORY_LIMIT",
                value: "0".into(),
            });
        }

        let initial_delay = millis_or(
            &lookup,
            "BACKOFF_INITIAL_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_delay = millis_or(&lookup, "BACKOFF_MAX_MS", defaults.max_delay.as_millis() as u64)?;
        if max_delay > MAX_SUSPENSION {
            return Err(ConfigError::Invalid {
                var: "BACKOFF_MAX_MS",
                value: max_delay.as_millis().to_string(),
            });
        }
        if initial_delay > max_delay {
            return Err(ConfigError::Invalid {
                var: "BACKOFF_INITIAL_MS",
                value: initial_delay.as_millis().to_string(),
            });
        }

        Ok(Self {
            sim_interval: interval_or(&lookup, "SIM_INTERVAL_MS", DEFAULT_SIM_INTERVAL_MS)?,
            poll_interval: interval_or(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            poll_concurrency,
            backoff: BackoffConfig {
                max_retries: parse_or(&lookup, "BACKOFF_MAX_RETRIES", defaults.max_retries)?,
                initial_delay,
                max_delay,
            },
            history_limit,
        })
    }
}

/// Where the daemon fetches data from and as whom.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub base_url: String,
    pub org_id: DbId,
    pub auth_token: String,
}

impl FeedSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required(&lookup, "FEED_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let raw_org = required(&lookup, "ORG_ID")?;
        let org_id = raw_org.trim().parse().map_err(|_| ConfigError::Invalid {
            var: "ORG_ID",
            value: raw_org.clone(),
        })?;
        let auth_token = required(&lookup, "AUTH_TOKEN")?;

        Ok(Self {
            base_url,
            org_id,
            auth_token,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, var, default_ms).map(Duration::from_millis)
}

/// Like [`millis_or`] but rejects zero, which timers cannot tick on.
fn interval_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let interval = millis_or(lookup, var, default_ms)?;
    if interval.is_zero() {
        return Err(ConfigError::Invalid {
            var,
            value: "0".into(),
        });
    }
    Ok(interval)
}
