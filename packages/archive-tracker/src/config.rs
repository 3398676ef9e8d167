//! Tracker configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use crate::callbacks::DEFAULT_WEBHOOK_TIMEOUT;
use crate::error::ConfigError;
use crate::types::options::{
    CheckOptions, SubmitOptions, DEFAULT_MAX_WAIT_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

/// User agent sent to providers and webhooks.
pub const DEFAULT_USER_AGENT: &str = concat!("archive-tracker/", env!("CARGO_PKG_VERSION"));

/// Default per-call provider budget for monitor polls.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default batch fan-out width.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Default politeness delay between batch dispatches on one slot.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Process-level settings. Per-job behaviour lives in the option structs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub user_agent: String,

    /// Budget for each provider call made by job monitors
    pub provider_timeout: Duration,

    /// Budget for each webhook POST
    pub webhook_timeout: Duration,

    /// Poll interval applied by [`TrackerConfig::submit_options`]
    pub default_poll_interval_secs: f64,

    /// Max wait applied by [`TrackerConfig::submit_options`]
    pub default_max_wait_secs: f64,

    pub batch_concurrency: usize,
    pub batch_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            webhook_timeout: DEFAULT_WEBHOOK_TIMEOUT,
            default_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            default_max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            user_agent: lookup("ARCHIVE_TRACKER_USER_AGENT").unwrap_or(defaults.user_agent),
            provider_timeout: parse_secs(
                &lookup,
                "ARCHIVE_TRACKER_PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout,
            )?,
            webhook_timeout: parse_secs(
                &lookup,
                "ARCHIVE_TRACKER_WEBHOOK_TIMEOUT_SECS",
                defaults.webhook_timeout,
            )?,
            default_poll_interval_secs: parse_positive_f64(
                &lookup,
                "ARCHIVE_TRACKER_POLL_INTERVAL_SECS",
                defaults.default_poll_interval_secs,
            )?,
            default_max_wait_secs: parse_positive_f64(
                &lookup,
                "ARCHIVE_TRACKER_MAX_WAIT_SECS",
                defaults.default_max_wait_secs,
            )?,
            batch_concurrency: match lookup("ARCHIVE_TRACKER_BATCH_CONCURRENCY") {
                Some(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(ConfigError::InvalidValue {
                        key: "ARCHIVE_TRACKER_BATCH_CONCURRENCY",
                        expected: "a positive integer",
                        value: raw,
                    })?,
                None => defaults.batch_concurrency,
            },
            batch_delay: match lookup("ARCHIVE_TRACKER_BATCH_DELAY_SECS") {
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or(ConfigError::InvalidValue {
                        key: "ARCHIVE_TRACKER_BATCH_DELAY_SECS",
                        expected: "a non-negative number of seconds",
                        value: raw,
                    })?,
                None => defaults.batch_delay,
            },
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    /// Submit options carrying this config's poll interval and max wait.
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions::new()
            .with_poll_interval(self.default_poll_interval_secs)
            .with_max_wait(self.default_max_wait_secs)
    }

    /// Check options carrying this config's provider timeout.
    pub fn check_options(&self) -> CheckOptions {
        CheckOptions::new().with_timeout_seconds(self.provider_timeout.as_secs().max(1))
    }
}

fn parse_secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigError::InvalidValue {
                key,
                expected: "a positive whole number of seconds",
                value: raw,
            }),
        None => Ok(default),
    }
}

fn parse_positive_f64<F>(lookup: &F, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or(ConfigError::InvalidValue {
                key,
                expected: "a positive number of seconds",
                value: raw,
            }),
        None => Ok(default),
    }
}
