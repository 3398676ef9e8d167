//! Lifecycle events delivered to callback sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::traits::provider::ProviderKind;
use crate::types::job::{Job, JobId, JobStatus, ProviderState};

/// Event-specific fields, tagged by `event` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    JobSubmitted {
        providers: BTreeMap<ProviderKind, ProviderState>,
        poll_interval_seconds: f64,
        max_wait_seconds: f64,
    },
    /// Only the providers whose state changed this cycle
    JobProgress {
        changed: BTreeMap<ProviderKind, ProviderState>,
        status: JobStatus,
    },
    ProviderComplete {
        provider: ProviderKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archive_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archive_timestamp: Option<String>,
    },
    JobComplete {
        providers: BTreeMap<ProviderKind, ProviderState>,
        elapsed_seconds: f64,
    },
    JobTimeout {
        providers: BTreeMap<ProviderKind, ProviderState>,
        elapsed_seconds: f64,
        max_wait_seconds: f64,
    },
}

/// The kind of an event, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobSubmitted,
    JobProgress,
    ProviderComplete,
    JobComplete,
    JobTimeout,
}

/// One emission: `{job_id, url, event, ...payload, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub job_id: JobId,
    pub url: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl CallbackEvent {
    pub fn new(job: &Job, payload: EventPayload) -> Self {
        Self {
            job_id: job.job_id,
            url: job.url.clone(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::JobSubmitted { .. } => EventKind::JobSubmitted,
            EventPayload::JobProgress { .. } => EventKind::JobProgress,
            EventPayload::ProviderComplete { .. } => EventKind::ProviderComplete,
            EventPayload::JobComplete { .. } => EventKind::JobComplete,
            EventPayload::JobTimeout { .. } => EventKind::JobTimeout,
        }
    }

    pub fn job_submitted(job: &Job) -> Self {
        Self::new(
            job,
            EventPayload::JobSubmitted {
                providers: job.providers.clone(),
                poll_interval_seconds: job.poll_interval_seconds,
                max_wait_seconds: job.max_wait_seconds,
            },
        )
    }

    pub fn job_progress(job: &Job, changed: BTreeMap<ProviderKind, ProviderState>) -> Self {
        Self::new(
            job,
            EventPayload::JobProgress {
                changed,
                status: job.status,
            },
        )
    }

    pub fn provider_complete(job: &Job, provider: ProviderKind, state: &ProviderState) -> Self {
        Self::new(
            job,
            EventPayload::ProviderComplete {
                provider,
                archive_url: state.archive_url.clone(),
                archive_timestamp: state.archive_timestamp.clone(),
            },
        )
    }

    pub fn job_complete(job: &Job, elapsed_seconds: f64) -> Self {
        Self::new(
            job,
            EventPayload::JobComplete {
                providers: job.providers.clone(),
                elapsed_seconds,
            },
        )
    }

    pub fn job_timeout(job: &Job, elapsed_seconds: f64) -> Self {
        Self::new(
            job,
            EventPayload::JobTimeout {
                providers: job.providers.clone(),
                elapsed_seconds,
                max_wait_seconds: job.max_wait_seconds,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::CallbackConfig;

    fn job() -> Job {
        let mut providers = BTreeMap::new();
        providers.insert(ProviderKind::Wayback, ProviderState::missing());
        Job {
            job_id: JobId::new(),
            url: "https://example.com".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: JobStatus::Submitted,
            poll_interval_seconds: 60.0,
            max_wait_seconds: 600.0,
            submit_if_missing: true,
            providers,
            callbacks: CallbackConfig::default(),
            monitor_error: None,
        }
    }

    #[test]
    fn test_wire_shape_is_flat() {
        let job = job();
        let event = CallbackEvent::job_submitted(&job);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "job_submitted");
        assert_eq!(json["job_id"], job.job_id.to_string());
        assert_eq!(json["url"], "https://example.com");
        assert_eq!(json["providers"]["wayback"]["state"], "missing");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_jsonl_line_parses_back() {
        let job = job();
        let state = ProviderState::missing();
        let event = CallbackEvent::provider_complete(&job, ProviderKind::Wayback, &state);
        let line = serde_json::to_string(&event).unwrap();

        let parsed: CallbackEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.kind(), EventKind::ProviderComplete);
        assert_eq!(parsed, event);
    }
}
