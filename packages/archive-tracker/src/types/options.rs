//! Options for the check, submit and batch operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::traits::provider::ProviderKind;
use crate::types::job::CallbackConfig;

/// Default poll interval for job monitors.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 60.0;

/// Default upper bound on how long a job is tracked (6 hours).
pub const DEFAULT_MAX_WAIT_SECS: f64 = 21_600.0;

/// Default budget for the initial synchronous check+submit.
pub const DEFAULT_INITIAL_SUBMIT_TIMEOUT_SECS: u64 = 60;

/// Monitors never poll faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_wait() -> f64 {
    DEFAULT_MAX_WAIT_SECS
}

fn default_initial_timeout() -> u64 {
    DEFAULT_INITIAL_SUBMIT_TIMEOUT_SECS
}

fn default_check_timeout() -> u64 {
    60
}

fn default_completion_timeout() -> u64 {
    300
}

/// Converts a caller-supplied number of seconds, rejecting NaN, infinities
/// and non-positive values.
pub(crate) fn positive_seconds(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TrackerError::InvalidOptions(format!(
            "{name} must be a finite number greater than zero, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| TrackerError::InvalidOptions(format!("{name}: {e}")))
}

/// Options for a synchronous `check_and_submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckOptions {
    #[serde(default = "default_true")]
    pub check_wayback: bool,

    #[serde(default = "default_true")]
    pub check_archive_today: bool,

    /// Submit to providers that report the URL missing
    #[serde(default = "default_true")]
    pub submit_if_missing: bool,

    /// Block until submitted providers confirm presence
    #[serde(default)]
    pub wait_for_completion: bool,

    /// Per provider call budget
    #[serde(default = "default_check_timeout")]
    pub timeout_seconds: u64,

    /// Upper bound on `wait_for_completion`
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_seconds: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            check_wayback: true,
            check_archive_today: true,
            submit_if_missing: true,
            wait_for_completion: false,
            timeout_seconds: default_check_timeout(),
            completion_timeout_seconds: default_completion_timeout(),
        }
    }
}

impl CheckOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wayback(mut self, enabled: bool) -> Self {
        self.check_wayback = enabled;
        self
    }

    pub fn with_archive_today(mut self, enabled: bool) -> Self {
        self.check_archive_today = enabled;
        self
    }

    pub fn with_submit_if_missing(mut self, submit: bool) -> Self {
        self.submit_if_missing = submit;
        self
    }

    pub fn with_wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_completion_timeout_seconds(mut self, seconds: u64) -> Self {
        self.completion_timeout_seconds = seconds;
        self
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Wayback => self.check_wayback,
            ProviderKind::ArchiveToday => self.check_archive_today,
        }
    }

    /// Enabled providers in polling order.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_seconds)
    }
}

/// Options for `submit_async`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitOptions {
    #[serde(default = "default_true")]
    pub check_wayback: bool,

    #[serde(default = "default_true")]
    pub check_archive_today: bool,

    #[serde(default = "default_true")]
    pub submit_if_missing: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,

    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_file: Option<PathBuf>,

    #[serde(default = "default_initial_timeout")]
    pub initial_submit_timeout_seconds: u64,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            check_wayback: true,
            check_archive_today: true,
            submit_if_missing: true,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            max_wait_seconds: DEFAULT_MAX_WAIT_SECS,
            callback_url: None,
            callback_file: None,
            initial_submit_timeout_seconds: DEFAULT_INITIAL_SUBMIT_TIMEOUT_SECS,
        }
    }
}

impl SubmitOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wayback(mut self, enabled: bool) -> Self {
        self.check_wayback = enabled;
        self
    }

    pub fn with_archive_today(mut self, enabled: bool) -> Self {
        self.check_archive_today = enabled;
        self
    }

    pub fn with_submit_if_missing(mut self, submit: bool) -> Self {
        self.submit_if_missing = submit;
        self
    }

    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn with_max_wait(mut self, seconds: f64) -> Self {
        self.max_wait_seconds = seconds;
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_callback_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.callback_file = Some(path.into());
        self
    }

    pub fn with_initial_submit_timeout(mut self, seconds: u64) -> Self {
        self.initial_submit_timeout_seconds = seconds;
        self
    }

    /// Check the numeric options.
    pub fn validate(&self) -> Result<()> {
        positive_seconds("poll_interval_seconds", self.poll_interval_seconds)?;
        positive_seconds("max_wait_seconds", self.max_wait_seconds)?;
        if self.initial_submit_timeout_seconds == 0 {
            return Err(TrackerError::InvalidOptions(
                "initial_submit_timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Poll interval, clamped to [`MIN_POLL_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_seconds)
            .unwrap_or(MIN_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL)
    }

    /// Hard bound on how long the job is tracked.
    pub fn max_wait(&self) -> Result<Duration> {
        positive_seconds("max_wait_seconds", self.max_wait_seconds)
    }

    pub fn initial_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_submit_timeout_seconds)
    }

    /// The check options used for the initial synchronous round.
    ///
    /// Each call gets under half the initial budget, so a presence check
    /// followed by a submission finishes before the round is cut off.
    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            check_wayback: self.check_wayback,
            check_archive_today: self.check_archive_today,
            submit_if_missing: self.submit_if_missing,
            wait_for_completion: false,
            timeout_seconds: (self.initial_submit_timeout_seconds.saturating_sub(1) / 2).max(1),
            completion_timeout_seconds: 0,
        }
    }

    pub fn callbacks(&self) -> CallbackConfig {
        CallbackConfig {
            callback_url: self.callback_url.clone(),
            callback_file: self.callback_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_defaults() {
        let opts: SubmitOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, SubmitOptions::default());
        assert_eq!(opts.poll_interval(), Duration::from_secs(60));
        assert_eq!(opts.max_wait_seconds, 21_600.0);
        assert!(opts.submit_if_missing);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = serde_json::from_str::<SubmitOptions>(r#"{"poll_every": 5}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_poll_interval_clamped() {
        let opts = SubmitOptions::new().with_poll_interval(0.1);
        assert_eq!(opts.poll_interval(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_validate_rejects_infinite_wait() {
        assert!(SubmitOptions::new().with_max_wait(f64::INFINITY).validate().is_err());
        assert!(SubmitOptions::new().with_poll_interval(-1.0).validate().is_err());
        assert!(SubmitOptions::new().with_initial_submit_timeout(0).validate().is_err());
        assert!(SubmitOptions::new().validate().is_ok());
    }

    #[test]
    fn test_initial_round_fits_check_and_submit() {
        let opts = SubmitOptions::new().with_initial_submit_timeout(12);
        assert_eq!(opts.check_options().call_timeout(), Duration::from_secs(5));
        assert!(opts.check_options().call_timeout() * 2 < opts.initial_submit_timeout());

        let tiny = SubmitOptions::new().with_initial_submit_timeout(1);
        assert_eq!(tiny.check_options().call_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_enabled_providers_order() {
        let opts = CheckOptions::new().with_wayback(false);
        assert_eq!(opts.enabled_providers(), vec![ProviderKind::ArchiveToday]);
        assert_eq!(CheckOptions::new().enabled_providers(), ProviderKind::ALL.to_vec());
    }
}
