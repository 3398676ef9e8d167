//! Per-job background polling loop.
//!
//! One monitor task runs per job until the job reaches `Complete` or
//! `Timeout`. Each cycle:
//!
//! 1. Give up with `Timeout` once `max_wait` has elapsed
//! 2. Poll every enabled provider that is not yet present
//! 3. Emit `job_progress` with the providers whose state changed
//! 4. Emit a one-shot `provider_complete` per newly present provider
//! 5. Finish with `Complete` when every enabled provider is present
//! 6. Otherwise sleep for the poll interval (never less than one second)
//!
//! Monitors share nothing but the registry, so a slow provider for one job
//! never delays another job.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackDispatcher;
use crate::registry::SharedRegistry;
use crate::traits::provider::{bounded, ProviderClient, ProviderKind, ProviderSet};
use crate::types::event::CallbackEvent;
use crate::types::job::{Job, JobId, JobStatus, Observation, ProviderState};
use crate::types::options::{DEFAULT_MAX_WAIT_SECS, MIN_POLL_INTERVAL};

/// Poll one provider once and describe what was seen.
///
/// Uses the submission-status lookup when a correlation token exists,
/// otherwise a presence re-check. A negative answer triggers a (re)submission
/// when `submit_if_missing` is set and nothing is in flight yet.
///
/// A failed status lookup falls back to a presence check. If the URL is still
/// absent the token is treated as dead: it is dropped and, when allowed, the
/// URL is submitted again.
pub(crate) async fn observe_provider(
    client: &dyn ProviderClient,
    url: &str,
    state: &ProviderState,
    submit_if_missing: bool,
    timeout: Duration,
) -> Observation {
    let Some(token) = &state.submission_id else {
        let presence = match bounded(timeout, client.check_presence(url, timeout)).await {
            Ok(presence) => presence,
            Err(e) => return Observation::Failed(e.to_string()),
        };
        if presence.present {
            return Observation::Present {
                archive_url: presence.archive_url,
                timestamp: presence.timestamp,
            };
        }
        if submit_if_missing && state.awaiting_submission() {
            return match submit(client, url, timeout).await {
                Ok(submitted) => submitted,
                Err(message) => Observation::Failed(message),
            };
        }
        return Observation::Absent;
    };

    let status_error = match bounded(timeout, client.submission_status(url, token, timeout)).await {
        Ok(presence) if presence.present => {
            return Observation::Present {
                archive_url: presence.archive_url,
                timestamp: presence.timestamp,
            }
        }
        Ok(_) => return Observation::Pending,
        Err(e) => e,
    };

    let presence = match bounded(timeout, client.check_presence(url, timeout)).await {
        Ok(presence) => presence,
        Err(e) => {
            return Observation::Failed(format!("status lookup failed: {status_error}; {e}"))
        }
    };
    if presence.present {
        return Observation::Present {
            archive_url: presence.archive_url,
            timestamp: presence.timestamp,
        };
    }

    let lost = format!("submission {token} lost: {status_error}");
    if !submit_if_missing {
        return Observation::SubmissionLost(lost);
    }
    match submit(client, url, timeout).await {
        Ok(submitted) => submitted,
        Err(message) => Observation::SubmissionLost(format!("{lost}; {message}")),
    }
}

async fn submit(
    client: &dyn ProviderClient,
    url: &str,
    timeout: Duration,
) -> Result<Observation, String> {
    bounded(timeout, client.submit(url, timeout))
        .await
        .map(|receipt| Observation::Submitted {
            archive_url: receipt.archive_url,
            token: receipt.token,
        })
        .map_err(|e| format!("submit failed: {e}"))
}

/// Background monitor for a single job.
pub struct JobMonitor {
    job_id: JobId,
    registry: SharedRegistry,
    providers: ProviderSet,
    dispatcher: Arc<CallbackDispatcher>,
    request_timeout: Duration,
}

impl JobMonitor {
    pub fn new(
        job_id: JobId,
        registry: SharedRegistry,
        providers: ProviderSet,
        dispatcher: Arc<CallbackDispatcher>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            job_id,
            registry,
            providers,
            dispatcher,
            request_timeout,
        }
    }

    /// Run until the job reaches a terminal status.
    pub async fn run(self) {
        let Some(job) = self.registry.get(&self.job_id) else {
            warn!(job_id = %self.job_id, "Monitor started for unknown job");
            return;
        };

        let started = Instant::now();
        let poll_interval = Duration::try_from_secs_f64(job.poll_interval_seconds)
            .unwrap_or(MIN_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL);
        let max_wait = Duration::try_from_secs_f64(job.max_wait_seconds)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_MAX_WAIT_SECS));

        info!(
            job_id = %self.job_id,
            url = %job.url,
            poll_interval_secs = poll_interval.as_secs_f64(),
            max_wait_secs = max_wait.as_secs_f64(),
            "Job monitor started"
        );
        self.dispatcher
            .emit(&CallbackEvent::job_submitted(&job), &job.callbacks)
            .await;

        let mut notified: BTreeSet<ProviderKind> = BTreeSet::new();

        loop {
            let elapsed = started.elapsed();
            if elapsed > max_wait {
                self.finish(JobStatus::Timeout, elapsed).await;
                return;
            }

            let Some(job) = self.registry.get(&self.job_id) else {
                return;
            };
            let changed = self.poll_once(&job).await;

            let Some(job) = self.registry.get(&self.job_id) else {
                return;
            };
            if !changed.is_empty() {
                debug!(job_id = %self.job_id, changed = changed.len(), "Provider states changed");
                self.dispatcher
                    .emit(&CallbackEvent::job_progress(&job, changed), &job.callbacks)
                    .await;
            }

            for (kind, state) in job.enabled_providers() {
                if state.is_present() && notified.insert(*kind) {
                    info!(job_id = %self.job_id, provider = %kind, "Provider archived URL");
                    self.dispatcher
                        .emit(
                            &CallbackEvent::provider_complete(&job, *kind, state),
                            &job.callbacks,
                        )
                        .await;
                }
            }

            if job.all_present() {
                self.finish(JobStatus::Complete, started.elapsed()).await;
                return;
            }

            // Never sleep past the deadline, so the timeout fires on time.
            let remaining = max_wait.saturating_sub(started.elapsed());
            let pause = poll_interval.min(remaining + Duration::from_millis(1));
            tokio::time::sleep(pause).await;
        }
    }

    /// One poll over every enabled provider that is not yet present.
    ///
    /// Persists changes to the registry and returns only the changed
    /// providers.
    pub async fn poll_once(&self, job: &Job) -> BTreeMap<ProviderKind, ProviderState> {
        let mut changed = BTreeMap::new();

        for (kind, state) in job.enabled_providers() {
            if state.is_present() {
                continue;
            }
            let Some(client) = self.providers.get(*kind) else {
                warn!(job_id = %self.job_id, provider = %kind, "No client registered for provider");
                continue;
            };

            let observation = observe_provider(
                client.as_ref(),
                &job.url,
                state,
                job.submit_if_missing,
                self.request_timeout,
            )
            .await;
            match &observation {
                Observation::Failed(message) => {
                    warn!(job_id = %self.job_id, provider = %kind, error = %message, "Provider poll failed");
                }
                Observation::SubmissionLost(message) => {
                    warn!(job_id = %self.job_id, provider = %kind, error = %message, "Provider lost submission");
                }
                _ => {}
            }

            let next = state.apply(observation);
            if next == *state {
                continue;
            }
            if let Some(stored) = self
                .registry
                .mutate_provider(&self.job_id, *kind, |s| *s = next.clone())
            {
                changed.insert(*kind, stored);
            }
        }

        changed
    }

    async fn finish(&self, status: JobStatus, elapsed: Duration) {
        let Some(job) = self.registry.set_status(&self.job_id, status) else {
            return;
        };
        let elapsed_seconds = elapsed.as_secs_f64();

        let event = match status {
            JobStatus::Complete => {
                info!(job_id = %self.job_id, elapsed_secs = elapsed_seconds, "Job complete");
                CallbackEvent::job_complete(&job, elapsed_seconds)
            }
            JobStatus::Timeout => {
                warn!(job_id = %self.job_id, elapsed_secs = elapsed_seconds, "Job timed out");
                CallbackEvent::job_timeout(&job, elapsed_seconds)
            }
            JobStatus::Submitted => return,
        };
        self.dispatcher.emit(&event, &job.callbacks).await;
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "monitor panicked".to_string()
    }
}

/// Spawn a monitor under a supervisor task.
///
/// The returned handle belongs to the supervisor. Aborting it aborts the
/// monitor too; a monitor panic is logged and recorded on the job instead of
/// vanishing with the task.
pub fn spawn_supervised(monitor: JobMonitor) -> JoinHandle<()> {
    let job_id = monitor.job_id;
    let registry = Arc::clone(&monitor.registry);
    let inner = tokio::spawn(monitor.run());

    tokio::spawn(async move {
        let mut guard = AbortOnDrop(inner);
        match (&mut guard.0).await {
            Ok(()) => debug!(job_id = %job_id, "Monitor exited"),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(job_id = %job_id, panic = %message, "Monitor task panicked");
                registry.record_monitor_failure(&job_id, format!("monitor panicked: {message}"));
            }
            Err(_) => debug!(job_id = %job_id, "Monitor cancelled"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobRegistry;
    use crate::testing::{MockProvider, RecordingTransport};
    use crate::types::event::EventKind;
    use crate::types::job::{ArchiveState, CallbackConfig};
    use chrono::Utc;

    const URL: &str = "https://example.com/article";

    fn job(poll: f64, max_wait: f64, providers: &[ProviderKind]) -> Job {
        Job {
            job_id: JobId::new(),
            url: URL.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: JobStatus::Submitted,
            poll_interval_seconds: poll,
            max_wait_seconds: max_wait,
            submit_if_missing: false,
            providers: providers
                .iter()
                .map(|k| (*k, ProviderState::missing()))
                .collect(),
            callbacks: CallbackConfig::default(),
            monitor_error: None,
        }
    }

    fn setup(
        job: &Job,
        providers: ProviderSet,
    ) -> (JobMonitor, SharedRegistry, Arc<CallbackDispatcher>) {
        let registry = Arc::new(JobRegistry::new());
        registry.put(job.clone());
        let dispatcher = Arc::new(CallbackDispatcher::new(RecordingTransport::new()));
        let monitor = JobMonitor::new(
            job.job_id,
            Arc::clone(&registry),
            providers,
            Arc::clone(&dispatcher),
            Duration::from_secs(5),
        );
        (monitor, registry, dispatcher)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CallbackEvent>) -> Vec<CallbackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn with_token(mut job: Job, token: &str) -> Job {
        job.providers.insert(
            ProviderKind::Wayback,
            ProviderState::missing().apply(Observation::Submitted {
                archive_url: None,
                token: Some(token.into()),
            }),
        );
        job
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_present_on_first_poll() {
        let job = job(60.0, 3600.0, &ProviderKind::ALL);
        let wayback = MockProvider::new().present(URL);
        let today = MockProvider::new().present(URL);
        let providers = ProviderSet::new()
            .with(ProviderKind::Wayback, wayback.clone())
            .with(ProviderKind::ArchiveToday, today.clone());
        let (monitor, registry, dispatcher) = setup(&job, providers);
        let mut rx = dispatcher.subscribe();

        let start = Instant::now();
        monitor.run().await;
        assert!(start.elapsed() < Duration::from_secs(60));

        let stored = registry.get(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert!(stored.providers.values().all(ProviderState::is_present));

        let kinds: Vec<EventKind> = drain(&mut rx).iter().map(CallbackEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::JobSubmitted,
                EventKind::JobProgress,
                EventKind::ProviderComplete,
                EventKind::ProviderComplete,
                EventKind::JobComplete,
            ]
        );
        assert_eq!(wayback.check_count(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_present() {
        let job = job(1.0, 5.0, &[ProviderKind::Wayback]);
        let wayback = MockProvider::new();
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, dispatcher) = setup(&job, providers);
        let mut rx = dispatcher.subscribe();

        let start = Instant::now();
        monitor.run().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed <= Duration::from_secs(6));
        assert_eq!(registry.get(&job.job_id).unwrap().status, JobStatus::Timeout);

        let events = drain(&mut rx);
        assert_eq!(events.last().unwrap().kind(), EventKind::JobTimeout);
        assert!(events.iter().all(|e| e.kind() != EventKind::JobComplete));
        // Polls at t = 0..=5
        assert_eq!(wayback.check_count(URL), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_complete_fires_once_per_provider() {
        let job = job(1.0, 60.0, &ProviderKind::ALL);
        let wayback = MockProvider::new().present(URL);
        let today = MockProvider::new().present_after(URL, 3);
        let providers = ProviderSet::new()
            .with(ProviderKind::Wayback, wayback.clone())
            .with(ProviderKind::ArchiveToday, today.clone());
        let (monitor, registry, dispatcher) = setup(&job, providers);
        let mut rx = dispatcher.subscribe();

        monitor.run().await;

        assert_eq!(registry.get(&job.job_id).unwrap().status, JobStatus::Complete);
        let events = drain(&mut rx);
        let completes: Vec<_> = events
            .iter()
            .filter(|e| e.kind() == EventKind::ProviderComplete)
            .collect();
        assert_eq!(completes.len(), 2);
        assert_eq!(
            events.iter().filter(|e| e.kind() == EventKind::JobComplete).count(),
            1
        );
        // Wayback is never re-polled once present.
        assert_eq!(wayback.check_count(URL), 1);
        assert_eq!(today.check_count(URL), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_carries_only_changed_providers() {
        let job = job(1.0, 60.0, &ProviderKind::ALL);
        let providers = ProviderSet::new()
            .with(ProviderKind::Wayback, MockProvider::new().present(URL))
            .with(ProviderKind::ArchiveToday, MockProvider::new().present_after(URL, 2));
        let (monitor, _registry, dispatcher) = setup(&job, providers);
        let mut rx = dispatcher.subscribe();

        monitor.run().await;

        let progress: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e.payload {
                crate::types::event::EventPayload::JobProgress { changed, .. } => Some(changed),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].keys().collect::<Vec<_>>(), vec![&ProviderKind::Wayback]);
        assert_eq!(
            progress[1].keys().collect::<Vec<_>>(),
            vec![&ProviderKind::ArchiveToday]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_retried_without_failing_the_job() {
        let job = job(1.0, 3.0, &ProviderKind::ALL);
        let providers = ProviderSet::new()
            .with(ProviderKind::Wayback, MockProvider::new().present(URL))
            .with(ProviderKind::ArchiveToday, MockProvider::new().failing_checks(URL));
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        monitor.run().await;

        let stored = registry.get(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Timeout);
        assert!(stored.providers[&ProviderKind::Wayback].is_present());
        let today = &stored.providers[&ProviderKind::ArchiveToday];
        assert_eq!(today.state, ArchiveState::Error);
        assert!(today.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_lookup_used_when_token_present() {
        let job = with_token(job(1.0, 60.0, &[ProviderKind::Wayback]), "spn2-1");
        let wayback = MockProvider::new().present_after(URL, 2);
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        monitor.run().await;

        assert_eq!(registry.get(&job.job_id).unwrap().status, JobStatus::Complete);
        assert_eq!(wayback.status_count(URL), 2);
        assert_eq!(wayback.check_count(URL), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmits_after_failed_initial_submission() {
        let mut job = job(1.0, 60.0, &[ProviderKind::Wayback]);
        job.submit_if_missing = true;
        let wayback = MockProvider::new().with_submit_token("spn2-2").present_after(URL, 2);
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        monitor.run().await;

        assert_eq!(registry.get(&job.job_id).unwrap().status, JobStatus::Complete);
        assert_eq!(wayback.submit_count(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_lookup_falls_back_to_presence() {
        let job = with_token(job(1.0, 60.0, &[ProviderKind::Wayback]), "spn2-dead");
        let wayback = MockProvider::new().failing_status().present(URL);
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        monitor.run().await;

        let stored = registry.get(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert!(stored.providers[&ProviderKind::Wayback].is_present());
        assert_eq!(wayback.status_count(URL), 1);
        assert_eq!(wayback.check_count(URL), 1);
        assert_eq!(wayback.submit_count(URL), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_token_is_dropped_and_resubmitted() {
        let mut job = with_token(job(1.0, 60.0, &[ProviderKind::Wayback]), "spn2-dead");
        job.submit_if_missing = true;
        let wayback = MockProvider::new().failing_status();
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        let stored = registry.get(&job.job_id).unwrap();
        let changed = monitor.poll_once(&stored).await;

        let state = &changed[&ProviderKind::Wayback];
        assert_eq!(state.state, ArchiveState::Submitted);
        assert!(state.submission_id.is_none());
        assert_eq!(wayback.status_count(URL), 1);
        assert_eq!(wayback.check_count(URL), 1);
        assert_eq!(wayback.submit_count(URL), 1);

        // Without a token the next poll goes back to presence checks.
        let stored = registry.get(&job.job_id).unwrap();
        wayback.mark_present(URL);
        monitor.poll_once(&stored).await;
        assert_eq!(wayback.status_count(URL), 1);
        assert_eq!(wayback.check_count(URL), 2);
        assert!(registry.get(&job.job_id).unwrap().providers[&ProviderKind::Wayback].is_present());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_token_without_resubmission_records_error() {
        let job = with_token(job(1.0, 60.0, &[ProviderKind::Wayback]), "spn2-dead");
        let wayback = MockProvider::new().failing_status();
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        let stored = registry.get(&job.job_id).unwrap();
        monitor.poll_once(&stored).await;

        let stored = registry.get(&job.job_id).unwrap();
        let state = &stored.providers[&ProviderKind::Wayback];
        assert_eq!(state.state, ArchiveState::Error);
        assert!(state.submission_id.is_none());
        assert!(state.last_error.as_deref().unwrap().contains("spn2-dead"));
        assert_eq!(wayback.submit_count(URL), 0);
    }

    #[tokio::test]
    async fn test_supervisor_records_panics() {
        let job = job(1.0, 60.0, &[ProviderKind::Wayback]);
        let providers =
            ProviderSet::new().with(ProviderKind::Wayback, MockProvider::new().panicking(URL));
        let (monitor, registry, _dispatcher) = setup(&job, providers);

        let handle = spawn_supervised(monitor);
        handle.await.unwrap();

        let stored = registry.get(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Submitted);
        assert!(stored
            .monitor_error
            .as_deref()
            .unwrap()
            .contains("mock provider panic"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborting_supervisor_stops_monitor() {
        let job = job(1.0, 3600.0, &[ProviderKind::Wayback]);
        let wayback = MockProvider::new();
        let providers = ProviderSet::new().with(ProviderKind::Wayback, wayback.clone());
        let (monitor, _registry, _dispatcher) = setup(&job, providers);

        let handle = spawn_supervised(monitor);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();
        let _ = handle.await;
        let polls = wayback.check_count(URL);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(wayback.check_count(URL), polls);
    }
}
