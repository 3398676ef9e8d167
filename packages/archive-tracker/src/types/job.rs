//! Job and per-provider state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::traits::provider::ProviderKind;
use crate::types::result::ProviderCheck;

/// Unique identifier for a tracked job (random 128-bit id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Complete,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Timeout)
    }
}

/// Where a provider stands for this job's URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    Missing,
    Submitted,
    Pending,
    Present,
    Error,
}

/// What one poll of a provider observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Snapshot confirmed
    Present {
        archive_url: Option<String>,
        timestamp: Option<String>,
    },
    /// Provider accepted a (re)submission
    Submitted {
        archive_url: Option<String>,
        token: Option<String>,
    },
    /// Status lookup says the submission is still being processed
    Pending,
    /// Presence check was negative
    Absent,
    /// The call failed
    Failed(String),
    /// The provider no longer knows the submission and the URL is still absent
    SubmissionLost(String),
}

/// Per-provider state inside a [`Job`].
///
/// Moves forward `Missing -> {Submitted, Pending} -> Present`, or to `Error`
/// from any non-present state. `Present` is absorbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub enabled: bool,
    pub state: ArchiveState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_timestamp: Option<String>,

    /// Provider correlation token for the submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderState {
    pub fn missing() -> Self {
        Self {
            enabled: true,
            state: ArchiveState::Missing,
            archive_url: None,
            archive_timestamp: None,
            submission_id: None,
            last_error: None,
        }
    }

    /// Seed the state from the initial synchronous check.
    pub fn from_check(check: &ProviderCheck) -> Self {
        let mut state = Self::missing();
        if check.present {
            state.state = ArchiveState::Present;
            state.archive_url = check.archive_url.clone();
            state.archive_timestamp = check.archive_timestamp.clone();
        } else if check.submitted() {
            state.state = ArchiveState::Submitted;
            state.submission_id = check.token().map(str::to_string);
            state.archive_url = check.submission.as_ref().and_then(|s| s.archive_url.clone());
        } else {
            state.last_error = check
                .error
                .clone()
                .or_else(|| check.submission.as_ref().and_then(|s| s.error.clone()));
        }
        state
    }

    pub fn is_present(&self) -> bool {
        self.state == ArchiveState::Present
    }

    /// Whether a fresh submission may be attempted from this state.
    pub fn awaiting_submission(&self) -> bool {
        self.submission_id.is_none()
            && matches!(self.state, ArchiveState::Missing | ArchiveState::Error)
    }

    /// Apply one poll observation, returning the next state.
    pub fn apply(&self, observation: Observation) -> Self {
        if self.is_present() {
            return self.clone();
        }

        let mut next = self.clone();
        match observation {
            Observation::Present {
                archive_url,
                timestamp,
            } => {
                next.state = ArchiveState::Present;
                next.archive_url = archive_url.or(next.archive_url);
                next.archive_timestamp = timestamp;
                next.last_error = None;
            }
            Observation::Submitted { archive_url, token } => {
                next.state = ArchiveState::Submitted;
                next.archive_url = archive_url.or(next.archive_url);
                next.submission_id = token;
                next.last_error = None;
            }
            Observation::Pending => {
                next.state = ArchiveState::Pending;
                next.last_error = None;
            }
            Observation::Absent => {
                next.state = match self.state {
                    ArchiveState::Error if self.submission_id.is_some() => ArchiveState::Pending,
                    ArchiveState::Error => ArchiveState::Missing,
                    other => other,
                };
                next.last_error = None;
            }
            Observation::Failed(message) => {
                next.state = ArchiveState::Error;
                next.last_error = Some(message);
            }
            Observation::SubmissionLost(message) => {
                next.state = ArchiveState::Error;
                next.submission_id = None;
                next.last_error = Some(message);
            }
        }
        next
    }
}

/// Where lifecycle events for a job are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Webhook receiving a POST per event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// JSON Lines file receiving one line per event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_file: Option<PathBuf>,
}

impl CallbackConfig {
    pub fn is_empty(&self) -> bool {
        self.callback_url.is_none() && self.callback_file.is_none()
    }
}

/// A tracked asynchronous submission of one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub poll_interval_seconds: f64,
    pub max_wait_seconds: f64,
    pub submit_if_missing: bool,
    pub providers: BTreeMap<ProviderKind, ProviderState>,
    pub callbacks: CallbackConfig,

    /// Set when the monitor task died without reaching a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_error: Option<String>,
}

impl Job {
    /// Enabled providers in polling order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&ProviderKind, &ProviderState)> {
        self.providers.iter().filter(|(_, state)| state.enabled)
    }

    /// True when every enabled provider is present.
    pub fn all_present(&self) -> bool {
        let mut enabled = self.enabled_providers().peekable();
        enabled.peek().is_some() && enabled.all(|(_, state)| state.is_present())
    }
}
