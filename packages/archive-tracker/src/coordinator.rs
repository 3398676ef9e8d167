//! Entry point for checking, submitting and tracking URLs.
//!
//! `SubmissionCoordinator` owns the provider clients, the job registry and the
//! callback dispatcher. Cloning it is cheap and every clone shares the same
//! registry.

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::batch::BatchRunner;
use crate::callbacks::{CallbackDispatcher, ReqwestTransport};
use crate::config::{
    TrackerConfig, DEFAULT_BATCH_CONCURRENCY, DEFAULT_BATCH_DELAY, DEFAULT_PROVIDER_TIMEOUT,
};
use crate::error::{Result, TrackerError};
use crate::monitor::{spawn_supervised, JobMonitor};
use crate::providers::{ArchiveTodayClient, WaybackClient};
use crate::registry::{JobRegistry, SharedRegistry};
use crate::traits::provider::{bounded, ProviderKind, ProviderSet};
use crate::types::job::{Job, JobId, JobStatus, ProviderState};
use crate::types::options::{CheckOptions, SubmitOptions};
use crate::types::result::{
    BatchResult, CheckResult, PresenceResult, ProviderCheck, ResultStatus, SubmitResult,
};

/// How often `wait_for_completion` re-checks submitted providers.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Accept only absolute http(s) URLs with a host.
fn validate_target_url(url: &str) -> Result<Url> {
    let invalid = |reason: &str| TrackerError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(parsed)
}

/// Checks archives, submits missing URLs and tracks submissions as jobs.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    providers: ProviderSet,
    registry: SharedRegistry,
    dispatcher: Arc<CallbackDispatcher>,
    request_timeout: Duration,
    batch_concurrency: usize,
    batch_delay: Duration,
}

impl SubmissionCoordinator {
    /// Create a coordinator with a fresh registry.
    pub fn new(providers: ProviderSet, dispatcher: CallbackDispatcher) -> Self {
        Self {
            providers,
            registry: Arc::new(JobRegistry::new()),
            dispatcher: Arc::new(dispatcher),
            request_timeout: DEFAULT_PROVIDER_TIMEOUT,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    /// Build the real Wayback and archive.today clients from config.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let providers = ProviderSet::new()
            .with(
                ProviderKind::Wayback,
                WaybackClient::new()?.with_user_agent(&config.user_agent),
            )
            .with(
                ProviderKind::ArchiveToday,
                ArchiveTodayClient::new()?.with_user_agent(&config.user_agent),
            );
        let transport = ReqwestTransport::new()?.with_user_agent(&config.user_agent);
        let dispatcher =
            CallbackDispatcher::new(transport).with_webhook_timeout(config.webhook_timeout);

        Ok(Self::new(providers, dispatcher)
            .with_request_timeout(config.provider_timeout)
            .with_batch_concurrency(config.batch_concurrency)
            .with_batch_delay(config.batch_delay))
    }

    /// Share an existing registry.
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Per-call budget used by job monitors.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Default fan-out width for batches (0 is treated as 1).
    pub fn with_batch_concurrency(mut self, max_concurrent: usize) -> Self {
        self.batch_concurrency = max_concurrent.max(1);
        self
    }

    /// Default per-slot pause between batch checks.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn batch_concurrency(&self) -> usize {
        self.batch_concurrency
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.dispatcher
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Validate the URL and resolve the enabled providers.
    fn resolve(&self, url: &str, enabled: Vec<ProviderKind>) -> Result<Vec<ProviderKind>> {
        validate_target_url(url)?;
        if enabled.is_empty() {
            return Err(TrackerError::NoProvidersEnabled);
        }
        if let Some(missing) = enabled.iter().find(|kind| !self.providers.contains(**kind)) {
            return Err(TrackerError::ProviderNotConfigured(*missing));
        }
        Ok(enabled)
    }

    /// Check every enabled provider once and submit where missing.
    ///
    /// Never fails: validation and provider failures come back as a
    /// `status: error` result.
    pub async fn check_and_submit(&self, url: &str, options: &CheckOptions) -> CheckResult {
        let kinds = match self.resolve(url, options.enabled_providers()) {
            Ok(kinds) => kinds,
            Err(e) => {
                warn!(url = %url, error = %e, "Rejected check request");
                return CheckResult::failed(url, e.to_string());
            }
        };
        let timeout = options.call_timeout();

        let checks = join_all(
            kinds
                .iter()
                .map(|kind| self.check_provider(*kind, url, options.submit_if_missing, timeout)),
        )
        .await;
        let mut providers: BTreeMap<ProviderKind, ProviderCheck> =
            kinds.into_iter().zip(checks).collect();

        if options.wait_for_completion {
            self.wait_for_completion(url, &mut providers, options).await;
        }

        let errors: Vec<String> = providers
            .iter()
            .filter_map(|(kind, check)| check.error.as_ref().map(|e| format!("{kind}: {e}")))
            .collect();
        let recommendation = CheckResult::recommend(&providers);
        debug!(url = %url, recommendation = ?recommendation, errors = errors.len(), "Check finished");

        CheckResult {
            url: url.to_string(),
            status: if errors.is_empty() {
                ResultStatus::Success
            } else {
                ResultStatus::Error
            },
            providers,
            recommendation: Some(recommendation),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            checked_at: Utc::now(),
        }
    }

    async fn check_provider(
        &self,
        kind: ProviderKind,
        url: &str,
        submit_if_missing: bool,
        timeout: Duration,
    ) -> ProviderCheck {
        let Some(client) = self.providers.get(kind) else {
            return ProviderCheck {
                error: Some(TrackerError::ProviderNotConfigured(kind).to_string()),
                ..ProviderCheck::default()
            };
        };

        let mut check = ProviderCheck::default();
        match bounded(timeout, client.check_presence(url, timeout)).await {
            Ok(presence) => {
                check.present = presence.present;
                check.archive_url = presence.archive_url;
                check.archive_timestamp = presence.timestamp;
            }
            Err(e) => {
                warn!(url = %url, provider = %kind, error = %e, "Presence check failed");
                check.error = Some(e.to_string());
            }
        }

        if !check.present && submit_if_missing {
            check.submission_attempted = true;
            let outcome = SubmitResult::from(bounded(timeout, client.submit(url, timeout)).await);
            if let Some(e) = &outcome.error {
                warn!(url = %url, provider = %kind, error = %e, "Submission failed");
            } else {
                info!(url = %url, provider = %kind, "Submitted URL for archiving");
            }
            check.submission = Some(outcome);
        }

        check
    }

    /// Re-check accepted submissions until they are present or time runs out.
    async fn wait_for_completion(
        &self,
        url: &str,
        providers: &mut BTreeMap<ProviderKind, ProviderCheck>,
        options: &CheckOptions,
    ) {
        let deadline = Instant::now() + options.completion_timeout();
        let timeout = options.call_timeout();

        loop {
            let waiting: Vec<ProviderKind> = providers
                .iter()
                .filter(|(_, check)| !check.present && check.submitted())
                .map(|(kind, _)| *kind)
                .collect();
            if waiting.is_empty() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(url = %url, waiting = waiting.len(), "Gave up waiting for completion");
                return;
            }
            tokio::time::sleep(COMPLETION_POLL_INTERVAL.min(deadline - now)).await;

            for kind in waiting {
                let (Some(client), Some(check)) = (self.providers.get(kind), providers.get_mut(&kind))
                else {
                    continue;
                };
                let lookup = match check.token() {
                    Some(token) => {
                        bounded(timeout, client.submission_status(url, token, timeout)).await
                    }
                    None => bounded(timeout, client.check_presence(url, timeout)).await,
                };
                match lookup {
                    Ok(PresenceResult {
                        present: true,
                        archive_url,
                        timestamp,
                        ..
                    }) => {
                        check.present = true;
                        check.archive_url = archive_url.or(check.archive_url.take());
                        check.archive_timestamp = timestamp;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(url = %url, provider = %kind, error = %e, "Completion poll failed"),
                }
            }
        }
    }

    /// Check once, register a job and start its monitor.
    ///
    /// Returns as soon as the job is registered; polling happens in the
    /// background.
    pub async fn submit_async(&self, url: &str, options: SubmitOptions) -> Result<JobId> {
        options.validate()?;
        let check_options = options.check_options();
        self.resolve(url, check_options.enabled_providers())?;

        let initial = match tokio::time::timeout(
            options.initial_submit_timeout(),
            self.check_and_submit(url, &check_options),
        )
        .await
        {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    url = %url,
                    timeout_secs = options.initial_submit_timeout_seconds,
                    "Initial check timed out; monitor will retry"
                );
                None
            }
        };

        let providers = ProviderKind::ALL
            .iter()
            .map(|kind| {
                let mut state = initial
                    .as_ref()
                    .and_then(|result| result.provider(*kind))
                    .map(ProviderState::from_check)
                    .unwrap_or_else(ProviderState::missing);
                state.enabled = check_options.is_enabled(*kind);
                (*kind, state)
            })
            .collect();

        let now = Utc::now();
        let job = Job {
            job_id: JobId::new(),
            url: url.to_string(),
            created_at: now,
            updated_at: now,
            status: JobStatus::Submitted,
            poll_interval_seconds: options.poll_interval().as_secs_f64(),
            max_wait_seconds: options.max_wait_seconds,
            submit_if_missing: options.submit_if_missing,
            providers,
            callbacks: options.callbacks(),
            monitor_error: None,
        };
        let job_id = job.job_id;
        self.registry.put(job);

        let monitor = JobMonitor::new(
            job_id,
            Arc::clone(&self.registry),
            self.providers.clone(),
            Arc::clone(&self.dispatcher),
            self.request_timeout,
        );
        self.registry.track_monitor(job_id, spawn_supervised(monitor));

        info!(job_id = %job_id, url = %url, "Job submitted");
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.registry
            .get(job_id)
            .ok_or(TrackerError::JobNotFound(*job_id))
    }

    /// Run `check_and_submit` over many URLs with bounded concurrency.
    pub async fn check_and_submit_many(
        &self,
        urls: Vec<String>,
        options: &CheckOptions,
        max_concurrent: usize,
        delay_seconds: f64,
    ) -> BatchResult {
        BatchRunner::new(self.clone())
            .with_max_concurrent(max_concurrent)
            .with_delay_seconds(delay_seconds)
            .run(urls, options)
            .await
    }

    /// Check many URLs with the coordinator's batch defaults.
    pub async fn check_batch(&self, urls: Vec<String>, options: &CheckOptions) -> BatchResult {
        BatchRunner::new(self.clone()).run(urls, options).await
    }
}

impl std::fmt::Debug for SubmissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionCoordinator")
            .field("providers", &self.providers)
            .field("registry", &self.registry)
            .field("request_timeout", &self.request_timeout)
            .field("batch_concurrency", &self.batch_concurrency)
            .field("batch_delay", &self.batch_delay)
            .finish()
    }
}
