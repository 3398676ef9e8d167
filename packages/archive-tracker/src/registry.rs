//! Concurrency-safe job table.
//!
//! The registry owns every [`Job`]. The coordinator inserts a job once; after
//! that only the job's own monitor mutates it, through the closures below.
//! Jobs are never removed during the registry's lifetime.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::traits::provider::ProviderKind;
use crate::types::job::{Job, JobId, JobStatus, ProviderState};

/// What the registry knows about a job's monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Task still running
    Running,
    /// Task exited (terminal status reached or job vanished)
    Finished,
    /// No monitor was ever registered, or it was already joined or pruned
    Untracked,
}

/// Map from job id to job, plus the handles of the monitor tasks.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
    monitors: DashMap<JobId, JoinHandle<()>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a job.
    pub fn put(&self, job: Job) {
        self.jobs.insert(job.job_id, job);
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Ids of every job that has not reached a terminal status.
    pub fn active_job_ids(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Mutate one provider's state under the job's lock.
    ///
    /// Returns the updated state, or `None` when the job or provider is
    /// unknown. `updated_at` is bumped only when the state actually changed.
    pub fn mutate_provider<F>(
        &self,
        job_id: &JobId,
        provider: ProviderKind,
        updater: F,
    ) -> Option<ProviderState>
    where
        F: FnOnce(&mut ProviderState),
    {
        let mut job = self.jobs.get_mut(job_id)?;
        let state = job.providers.get_mut(&provider)?;
        let before = state.clone();
        updater(state);
        let after = state.clone();
        if after != before {
            job.updated_at = Utc::now();
        }
        Some(after)
    }

    /// Set the job status. Returns the updated job.
    pub fn set_status(&self, job_id: &JobId, status: JobStatus) -> Option<Job> {
        let mut job = self.jobs.get_mut(job_id)?;
        if job.status != status {
            job.status = status;
            job.updated_at = Utc::now();
        }
        Some(job.clone())
    }

    /// Record that the job's monitor died without finishing.
    pub fn record_monitor_failure(&self, job_id: &JobId, message: impl Into<String>) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.monitor_error = Some(message.into());
            job.updated_at = Utc::now();
        }
    }

    /// Keep the handle of a job's (supervised) monitor task.
    ///
    /// Handles of monitors that already exited are dropped first, so the
    /// table holds at most the live monitors plus those finished since the
    /// last submission.
    pub fn track_monitor(&self, job_id: JobId, handle: JoinHandle<()>) {
        self.prune_monitors();
        if let Some(previous) = self.monitors.insert(job_id, handle) {
            warn!(job_id = %job_id, "Replacing monitor handle; aborting previous task");
            previous.abort();
        }
    }

    /// Drop the handles of monitors that have exited. Returns how many were
    /// removed.
    pub fn prune_monitors(&self) -> usize {
        let before = self.monitors.len();
        self.monitors.retain(|_, handle| !handle.is_finished());
        let pruned = before.saturating_sub(self.monitors.len());
        if pruned > 0 {
            debug!(pruned, "Pruned finished monitor handles");
        }
        pruned
    }

    pub fn monitor_state(&self, job_id: &JobId) -> MonitorState {
        match self.monitors.get(job_id) {
            Some(handle) if handle.is_finished() => MonitorState::Finished,
            Some(_) => MonitorState::Running,
            None => MonitorState::Untracked,
        }
    }

    /// Wait for a job's monitor to exit.
    ///
    /// Returns `false` when no monitor was tracked for the job.
    pub async fn join_monitor(&self, job_id: &JobId) -> bool {
        // Remove first so the shard lock is not held across the await.
        let Some((_, handle)) = self.monitors.remove(job_id) else {
            return false;
        };
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(job_id = %job_id, "Monitor supervisor panicked");
            }
        }
        true
    }

    /// Abort every running monitor (process shutdown or test teardown).
    pub fn abort_all(&self) {
        for entry in self.monitors.iter() {
            entry.value().abort();
        }
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.len())
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

/// Registry shared between the coordinator and the monitors.
pub type SharedRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::{ArchiveState, CallbackConfig};
    use std::collections::BTreeMap;

    fn job() -> Job {
        let mut providers = BTreeMap::new();
        providers.insert(ProviderKind::Wayback, ProviderState::missing());
        let created = Utc::now() - chrono::Duration::seconds(5);
        Job {
            job_id: JobId::new(),
            url: "https://example.com".into(),
            created_at: created,
            updated_at: created,
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
    fn test_put_and_get() {
        let registry = JobRegistry::new();
        let job = job();
        registry.put(job.clone());

        assert_eq!(registry.get(&job.job_id), Some(job));
        assert!(registry.get(&JobId::new()).is_none());
    }

    #[test]
    fn test_mutate_provider_bumps_updated_at_only_on_change() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.job_id;
        registry.put(job.clone());

        registry.mutate_provider(&id, ProviderKind::Wayback, |_| {});
        assert_eq!(registry.get(&id).unwrap().updated_at, job.updated_at);

        let updated = registry
            .mutate_provider(&id, ProviderKind::Wayback, |s| s.state = ArchiveState::Pending)
            .unwrap();
        assert_eq!(updated.state, ArchiveState::Pending);
        assert!(registry.get(&id).unwrap().updated_at > job.updated_at);
    }

    #[test]
    fn test_mutate_unknown_provider_is_none() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.job_id;
        registry.put(job);

        assert!(registry
            .mutate_provider(&id, ProviderKind::ArchiveToday, |_| {})
            .is_none());
    }

    #[test]
    fn test_active_job_ids_excludes_terminal() {
        let registry = JobRegistry::new();
        let a = job();
        let b = job();
        registry.put(a.clone());
        registry.put(b.clone());
        registry.set_status(&b.job_id, JobStatus::Complete);

        assert_eq!(registry.active_job_ids(), vec![a.job_id]);
    }

    #[tokio::test]
    async fn test_join_monitor() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert_eq!(registry.monitor_state(&id), MonitorState::Untracked);

        registry.track_monitor(id, tokio::spawn(async {}));
        assert!(registry.join_monitor(&id).await);
        assert!(!registry.join_monitor(&id).await);
    }

    #[tokio::test]
    async fn test_finished_monitors_are_pruned() {
        let registry = JobRegistry::new();
        let done: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for id in &done {
            registry.track_monitor(*id, tokio::spawn(async {}));
        }
        while done
            .iter()
            .any(|id| registry.monitor_state(id) != MonitorState::Finished)
        {
            tokio::task::yield_now().await;
        }

        let live = JobId::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        registry.track_monitor(live, tokio::spawn(async move {
            let _ = rx.await;
        }));

        assert_eq!(registry.monitors.len(), 1);
        assert!(done
            .iter()
            .all(|id| registry.monitor_state(id) == MonitorState::Untracked));
        assert_eq!(registry.monitor_state(&live), MonitorState::Running);

        tx.send(()).unwrap();
        while registry.monitor_state(&live) != MonitorState::Finished {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.prune_monitors(), 1);
        assert_eq!(registry.monitor_state(&live), MonitorState::Untracked);
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_serialized() {
        let registry = Arc::new(JobRegistry::new());
        let job = job();
        let id = job.job_id;
        registry.put(job);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    registry.mutate_provider(&id, ProviderKind::Wayback, |s| {
                        let n: usize = s.last_error.as_deref().unwrap_or("0").parse().unwrap();
                        s.last_error = Some((n + 1).to_string());
                    });
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let state = &registry.get(&id).unwrap().providers[&ProviderKind::Wayback];
        assert_eq!(state.last_error.as_deref(), Some("1600"));
    }
}
