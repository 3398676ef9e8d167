//! Fans lifecycle events out to every configured sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::callbacks::file_sink;
use crate::error::{CallbackError, CallbackResult};
use crate::security::WebhookPolicy;
use crate::traits::transport::WebhookTransport;
use crate::types::event::CallbackEvent;
use crate::types::job::CallbackConfig;

/// Default webhook POST budget.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const OBSERVER_CAPACITY: usize = 1024;

/// Delivers events to the in-process observers, the JSONL file and the
/// webhook of a job.
///
/// Delivery is best-effort: every failure is logged and swallowed, so a
/// broken sink can never change job state.
pub struct CallbackDispatcher {
    transport: Arc<dyn WebhookTransport>,
    policy: WebhookPolicy,
    webhook_timeout: Duration,
    observers: broadcast::Sender<CallbackEvent>,
}

impl CallbackDispatcher {
    /// Create a dispatcher posting webhooks through `transport`.
    pub fn new(transport: impl WebhookTransport + 'static) -> Self {
        Self::with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(transport: Arc<dyn WebhookTransport>) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            transport,
            policy: WebhookPolicy::new(),
            webhook_timeout: DEFAULT_WEBHOOK_TIMEOUT,
            observers,
        }
    }

    /// Replace the SSRF policy.
    pub fn with_policy(mut self, policy: WebhookPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the webhook POST timeout.
    pub fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    /// Receive every event emitted from now on, for any job.
    pub fn subscribe(&self) -> broadcast::Receiver<CallbackEvent> {
        self.observers.subscribe()
    }

    /// Emit one event to the in-process observers and the job's sinks.
    pub async fn emit(&self, event: &CallbackEvent, sinks: &CallbackConfig) {
        debug!(job_id = %event.job_id, event = ?event.kind(), "Emitting callback event");

        // No receivers is the common case and not an error.
        let _ = self.observers.send(event.clone());

        if let Some(path) = &sinks.callback_file {
            if let Err(e) = file_sink::append_event(path, event).await {
                warn!(
                    job_id = %event.job_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to append callback event"
                );
            }
        }

        if let Some(url) = &sinks.callback_url {
            match self.post_webhook(url, event).await {
                Ok(()) => {}
                Err(CallbackError::Blocked(e)) => {
                    warn!(job_id = %event.job_id, url = %url, reason = %e, "Skipping blocked webhook");
                }
                Err(e) => {
                    warn!(job_id = %event.job_id, url = %url, error = %e, "Webhook delivery failed");
                }
            }
        }
    }

    async fn post_webhook(&self, url: &str, event: &CallbackEvent) -> CallbackResult<()> {
        let target = self.policy.validate(url)?;
        let body = serde_json::to_value(event)?;
        self.transport
            .post_json(&target, &body, self.webhook_timeout)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("policy", &self.policy)
            .field("webhook_timeout", &self.webhook_timeout)
            .field("observers", &self.observers.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::provider::ProviderKind;
    use crate::traits::transport::MockWebhookTransport;
    use crate::types::event::EventKind;
    use crate::types::job::{Job, JobId, JobStatus, ProviderState};
    use chrono::Utc;
    use std::collections::BTreeMap;

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

    fn webhook(url: &str) -> CallbackConfig {
        CallbackConfig {
            callback_url: Some(url.to_string()),
            callback_file: None,
        }
    }

    #[tokio::test]
    async fn test_blocked_webhooks_are_never_dispatched() {
        let mut transport = MockWebhookTransport::new();
        transport.expect_post_json().times(0);
        let dispatcher = CallbackDispatcher::new(transport);
        let event = CallbackEvent::job_submitted(&job());

        for url in [
            "http://127.0.0.1:9000/hook",
            "http://10.1.2.3/hook",
            "http://169.254.169.254/latest",
            "http://localhost/hook",
            "https://hooks.corp.internal/x",
            "https://nas.local/x",
            "ftp://example.com/x",
        ] {
            dispatcher.emit(&event, &webhook(url)).await;
        }
    }

    #[tokio::test]
    async fn test_public_webhook_receives_event_body() {
        let mut transport = MockWebhookTransport::new();
        transport
            .expect_post_json()
            .times(1)
            .withf(|url, body, timeout| {
                url.as_str() == "https://hooks.example.com/archive"
                    && body["event"] == "job_submitted"
                    && *timeout == DEFAULT_WEBHOOK_TIMEOUT
            })
            .returning(|_, _, _| Ok(200));
        let dispatcher = CallbackDispatcher::new(transport);

        dispatcher
            .emit(
                &CallbackEvent::job_submitted(&job()),
                &webhook("https://hooks.example.com/archive"),
            )
            .await;
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let mut transport = MockWebhookTransport::new();
        transport
            .expect_post_json()
            .times(1)
            .returning(|_, _, _| Err(CallbackError::Status(500)));
        let dispatcher = CallbackDispatcher::new(transport);
        let mut rx = dispatcher.subscribe();

        let dir = tempfile::tempdir().unwrap();
        let sinks = CallbackConfig {
            callback_url: Some("https://hooks.example.com/archive".into()),
            callback_file: Some(dir.path().join("missing-dir").join("events.jsonl")),
        };
        dispatcher.emit(&CallbackEvent::job_submitted(&job()), &sinks).await;

        // Observers still see the event.
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::JobSubmitted);
    }

    #[tokio::test]
    async fn test_file_sink_receives_event() {
        let transport = MockWebhookTransport::new();
        let dispatcher = CallbackDispatcher::new(transport);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sinks = CallbackConfig {
            callback_url: None,
            callback_file: Some(path.clone()),
        };

        dispatcher.emit(&CallbackEvent::job_submitted(&job()), &sinks).await;

        let events = file_sink::read_events(&path).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
