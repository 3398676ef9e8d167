//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the tracker without
//! making real archive or webhook calls.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

use crate::error::{CallbackResult, ProviderError, ProviderResult};
use crate::traits::provider::ProviderClient;
use crate::traits::transport::WebhookTransport;
use crate::types::result::{PresenceResult, SubmitReceipt};

/// Record of a call made to the mock provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockProviderCall {
    Check { url: String },
    Submit { url: String },
    Status { url: String, token: String },
}

#[derive(Default)]
struct MockProviderState {
    /// URLs present from the first check
    present: HashSet<String>,
    /// URLs that turn present after this many checks/status lookups
    present_after: HashMap<String, usize>,
    /// URLs whose presence checks fail
    failing_checks: HashSet<String>,
    /// URLs whose checks panic
    panicking: HashSet<String>,
    /// Observations so far, per URL
    observations: HashMap<String, usize>,
    calls: Vec<MockProviderCall>,
}

/// A mock provider with scripted presence and submission behaviour.
///
/// Clones share state, so a test can keep a handle for assertions after
/// moving a clone into a [`ProviderSet`](crate::traits::provider::ProviderSet).
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<RwLock<MockProviderState>>,
    fail_submits: bool,
    fail_status: bool,
    submit_token: Option<String>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a mock that reports every URL missing and accepts every submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `url` present from the first check.
    pub fn present(self, url: impl Into<String>) -> Self {
        self.state.write().unwrap().present.insert(url.into());
        self
    }

    /// Report `url` present once it has been observed `observations` times.
    pub fn present_after(self, url: impl Into<String>, observations: usize) -> Self {
        self.state
            .write()
            .unwrap()
            .present_after
            .insert(url.into(), observations);
        self
    }

    /// Make presence checks for `url` fail.
    pub fn failing_checks(self, url: impl Into<String>) -> Self {
        self.state.write().unwrap().failing_checks.insert(url.into());
        self
    }

    /// Make presence checks for `url` panic.
    pub fn panicking(self, url: impl Into<String>) -> Self {
        self.state.write().unwrap().panicking.insert(url.into());
        self
    }

    /// Reject every submission.
    pub fn failing_submits(mut self) -> Self {
        self.fail_submits = true;
        self
    }

    /// Fail every submission-status lookup, as if the token had expired.
    pub fn failing_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    /// Issue this correlation token on every accepted submission.
    pub fn with_submit_token(mut self, token: impl Into<String>) -> Self {
        self.submit_token = Some(token.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Flip `url` to present from now on.
    pub fn mark_present(&self, url: impl Into<String>) {
        self.state.write().unwrap().present.insert(url.into());
    }

    /// All calls in the order they were made.
    pub fn calls(&self) -> Vec<MockProviderCall> {
        self.state.read().unwrap().calls.clone()
    }

    pub fn check_count(&self, url: &str) -> usize {
        self.count(|call| matches!(call, MockProviderCall::Check { url: u } if u == url))
    }

    pub fn submit_count(&self, url: &str) -> usize {
        self.count(|call| matches!(call, MockProviderCall::Submit { url: u } if u == url))
    }

    pub fn status_count(&self, url: &str) -> usize {
        self.count(|call| matches!(call, MockProviderCall::Status { url: u, .. } if u == url))
    }

    pub fn total_submits(&self) -> usize {
        self.count(|call| matches!(call, MockProviderCall::Submit { .. }))
    }

    /// Highest number of concurrent calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&MockProviderCall) -> bool) -> usize {
        self.state.read().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn archive_url(url: &str) -> String {
        format!("https://archive.mock/snapshot/{url}")
    }

    /// Record an observation of `url` and answer whether it is present.
    fn observe(&self, url: &str, call: MockProviderCall) -> ProviderResult<PresenceResult> {
        let mut state = self.state.write().unwrap();
        state.calls.push(call);
        if state.panicking.contains(url) {
            drop(state);
            panic!("mock provider panic for {url}");
        }
        if state.failing_checks.contains(url) {
            return Err(ProviderError::Status(503));
        }

        let seen = {
            let count = state.observations.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let present = state.present.contains(url)
            || state
                .present_after
                .get(url)
                .is_some_and(|threshold| seen >= *threshold);

        if present {
            Ok(PresenceResult::found(Self::archive_url(url)).with_timestamp("20240101000000"))
        } else {
            Ok(PresenceResult::absent())
        }
    }

    async fn enter(&self) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        InFlightGuard(Arc::clone(&self.in_flight))
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn check_presence(&self, url: &str, _timeout: Duration) -> ProviderResult<PresenceResult> {
        let _guard = self.enter().await;
        self.observe(url, MockProviderCall::Check { url: url.to_string() })
    }

    async fn submit(&self, url: &str, _timeout: Duration) -> ProviderResult<SubmitReceipt> {
        let _guard = self.enter().await;
        self.state.write().unwrap().calls.push(MockProviderCall::Submit {
            url: url.to_string(),
        });
        if self.fail_submits {
            return Err(ProviderError::RateLimited);
        }
        let mut receipt = SubmitReceipt::new();
        if let Some(token) = &self.submit_token {
            receipt = receipt.with_token(token.clone());
        }
        Ok(receipt)
    }

    async fn submission_status(
        &self,
        url: &str,
        token: &str,
        _timeout: Duration,
    ) -> ProviderResult<PresenceResult> {
        let _guard = self.enter().await;
        if self.fail_status {
            self.state.write().unwrap().calls.push(MockProviderCall::Status {
                url: url.to_string(),
                token: token.to_string(),
            });
            return Err(ProviderError::Protocol(format!("unknown submission {token}")));
        }
        self.observe(
            url,
            MockProviderCall::Status {
                url: url.to_string(),
                token: token.to_string(),
            },
        )
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A webhook transport that records every POST instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    posts: Arc<RwLock<Vec<(Url, serde_json::Value)>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<(Url, serde_json::Value)> {
        self.posts.read().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.read().unwrap().len()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> CallbackResult<u16> {
        self.posts.write().unwrap().push((url.clone(), body.clone()));
        Ok(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_present_after_threshold() {
        let mock = MockProvider::new().present_after("https://a.example", 2);
        let t = Duration::from_secs(1);

        assert!(!mock.check_presence("https://a.example", t).await.unwrap().present);
        assert!(mock.check_presence("https://a.example", t).await.unwrap().present);
        assert_eq!(mock.check_count("https://a.example"), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mock = MockProvider::new().with_submit_token("tok");
        let clone = mock.clone();

        let receipt = clone.submit("https://a.example", Duration::from_secs(1)).await.unwrap();
        assert_eq!(receipt.token.as_deref(), Some("tok"));
        assert_eq!(mock.submit_count("https://a.example"), 1);
    }
}
