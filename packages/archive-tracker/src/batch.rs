//! Bounded fan-out of `check_and_submit` over many URLs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::coordinator::SubmissionCoordinator;
use crate::monitor::panic_message;
use crate::types::options::CheckOptions;
use crate::types::result::{BatchResult, BatchSummary, CheckResult};

/// Runs checks for a list of URLs, at most `max_concurrent` at a time.
///
/// After each check the slot stays occupied for `delay` before the next URL
/// may use it, to stay polite towards the providers.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    coordinator: SubmissionCoordinator,
    max_concurrent: usize,
    delay: Duration,
}

impl BatchRunner {
    /// Start from the coordinator's configured batch width and delay.
    pub fn new(coordinator: SubmissionCoordinator) -> Self {
        Self {
            max_concurrent: coordinator.batch_concurrency().max(1),
            delay: coordinator.batch_delay(),
            coordinator,
        }
    }

    /// Set the concurrency limit (0 is treated as 1).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the delay in seconds; negative or non-finite values mean no delay.
    pub fn with_delay_seconds(self, seconds: f64) -> Self {
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        self.with_delay(delay)
    }

    /// Check every URL. Results come back in input order.
    pub async fn run(&self, urls: Vec<String>, options: &CheckOptions) -> BatchResult {
        info!(
            urls = urls.len(),
            max_concurrent = self.max_concurrent,
            delay_secs = self.delay.as_secs_f64(),
            "Starting batch check"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (index, url) in urls.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let coordinator = self.coordinator.clone();
            let options = options.clone();
            let delay = self.delay;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, CheckResult::failed(url, "batch limiter closed")),
                };

                // Separate task so a panic stays confined to this URL.
                let check_url = url.clone();
                let check = tokio::spawn(async move {
                    coordinator.check_and_submit(&check_url, &options).await
                });
                let result = match check.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        warn!(url = %url, panic = %message, "Check panicked");
                        CheckResult::failed(url, format!("check panicked: {message}"))
                    }
                    Err(_) => CheckResult::failed(url, "check cancelled"),
                };

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (index, result)
            });
        }

        let mut slots: Vec<Option<CheckResult>> = vec![None; urls.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "Batch task failed"),
            }
        }

        let mut summary = BatchSummary::default();
        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| slot.unwrap_or_else(|| CheckResult::failed(url, "batch task failed")))
            .inspect(|result| summary.record(result))
            .collect();

        info!(
            total = summary.total,
            already_archived = summary.already_archived,
            newly_submitted = summary.newly_submitted,
            not_submitted = summary.not_submitted,
            errored = summary.errored,
            "Batch check complete"
        );

        BatchResult { results, summary }
    }
}
