//! Result types for provider calls and the public check operations.
//!
//! Each operation has its own tagged result; the JSON shape is what callers
//! (and webhook consumers) see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::traits::provider::ProviderKind;

/// Outcome of a presence check (or a submission-status lookup).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceResult {
    /// Whether a snapshot exists
    pub present: bool,

    /// Link to the snapshot when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    /// Provider timestamp of the snapshot (provider format, e.g. `20240101120000`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Provider correlation token, if the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl PresenceResult {
    /// A negative answer.
    pub fn absent() -> Self {
        Self::default()
    }

    /// A positive answer with a snapshot link.
    pub fn found(archive_url: impl Into<String>) -> Self {
        Self {
            present: true,
            archive_url: Some(archive_url.into()),
            ..Self::default()
        }
    }

    /// Set the snapshot timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Set the correlation token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Successful submission as reported by a provider client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub archive_url: Option<String>,
    pub token: Option<String>,
}

impl SubmitReceipt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive_url(mut self, archive_url: impl Into<String>) -> Self {
        self.archive_url = Some(archive_url.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Success/error tag carried by every public result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Raw submission outcome, in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub status: ResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

impl From<Result<SubmitReceipt, ProviderError>> for SubmitResult {
    fn from(result: Result<SubmitReceipt, ProviderError>) -> Self {
        match result {
            Ok(receipt) => Self {
                status: ResultStatus::Success,
                archive_url: receipt.archive_url,
                token: receipt.token,
                error: None,
            },
            Err(e) => Self {
                status: ResultStatus::Error,
                archive_url: None,
                token: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// What the caller should take away from a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Every enabled provider already holds a snapshot
    AlreadyArchived,
    /// At least one missing provider accepted a submission
    MissingButSubmitted,
    /// Missing somewhere and nothing was submitted
    MissingNotSubmitted,
}

/// Per-provider part of a [`CheckResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCheck {
    pub present: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_timestamp: Option<String>,

    /// Whether a submission was attempted for this provider
    pub submission_attempted: bool,

    /// Raw submission outcome when one was attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmitResult>,

    /// Presence check failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderCheck {
    /// Whether a submission was attempted and the provider accepted it.
    pub fn submitted(&self) -> bool {
        self.submission.as_ref().is_some_and(SubmitResult::is_success)
    }

    /// Correlation token from an accepted submission.
    pub fn token(&self) -> Option<&str> {
        self.submission
            .as_ref()
            .filter(|s| s.is_success())
            .and_then(|s| s.token.as_deref())
    }
}

/// Aggregated outcome of `check_and_submit` for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub url: String,
    pub status: ResultStatus,

    #[serde(default)]
    pub providers: BTreeMap<ProviderKind, ProviderCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    /// An error result carrying no provider information.
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: ResultStatus::Error,
            providers: BTreeMap::new(),
            recommendation: None,
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderCheck> {
        self.providers.get(&kind)
    }

    /// Presence flag for a provider (false when it was not checked).
    pub fn is_present(&self, kind: ProviderKind) -> bool {
        self.provider(kind).is_some_and(|p| p.present)
    }

    /// Whether an accepted submission went to this provider.
    pub fn submitted_to(&self, kind: ProviderKind) -> bool {
        self.provider(kind).is_some_and(ProviderCheck::submitted)
    }

    /// Derive the recommendation from the per-provider outcomes.
    pub(crate) fn recommend(providers: &BTreeMap<ProviderKind, ProviderCheck>) -> Recommendation {
        if !providers.is_empty() && providers.values().all(|p| p.present) {
            Recommendation::AlreadyArchived
        } else if providers.values().any(ProviderCheck::submitted) {
            Recommendation::MissingButSubmitted
        } else {
            Recommendation::MissingNotSubmitted
        }
    }
}

/// Summary counts for a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub already_archived: usize,
    pub newly_submitted: usize,
    pub not_submitted: usize,
    pub errored: usize,
}

impl BatchSummary {
    /// Tally one URL's outcome.
    pub fn record(&mut self, result: &CheckResult) {
        self.total += 1;
        if !result.is_success() {
            self.errored += 1;
            return;
        }
        match result.recommendation {
            Some(Recommendation::AlreadyArchived) => self.already_archived += 1,
            Some(Recommendation::MissingButSubmitted) => self.newly_submitted += 1,
            Some(Recommendation::MissingNotSubmitted) | None => self.not_submitted += 1,
        }
    }
}

/// Outcome of `check_and_submit_many`: per-URL results in input order plus counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<CheckResult>,
    pub summary: BatchSummary,
}
