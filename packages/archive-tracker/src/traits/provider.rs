//! Provider client trait: the "check presence" / "submit" contract every
//! archive back-end implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::types::result::{PresenceResult, SubmitReceipt};

/// The archive services the tracker knows about.
///
/// Serialises to the snake_case name used as the key of every provider map
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Internet Archive Wayback Machine
    Wayback,
    /// archive.today (archive.ph / archive.is)
    ArchiveToday,
}

impl ProviderKind {
    /// All providers, in polling order.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Wayback, ProviderKind::ArchiveToday];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Wayback => "wayback",
            ProviderKind::ArchiveToday => "archive_today",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for one archive provider.
///
/// Every call respects the caller-supplied timeout and reports failures as
/// [`ProviderError`](crate::error::ProviderError) values; implementations must
/// not panic on network or protocol errors.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Ask whether the provider already holds a snapshot of `url`.
    async fn check_presence(&self, url: &str, timeout: Duration) -> ProviderResult<PresenceResult>;

    /// Ask the provider to archive `url` now.
    async fn submit(&self, url: &str, timeout: Duration) -> ProviderResult<SubmitReceipt>;

    /// Look up an earlier submission by its correlation token.
    ///
    /// `present == false` in the result means the submission is still
    /// pending. Providers without a status API fall back to a presence check.
    async fn submission_status(
        &self,
        url: &str,
        _token: &str,
        timeout: Duration,
    ) -> ProviderResult<PresenceResult> {
        self.check_presence(url, timeout).await
    }

    /// Get the provider name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Run a provider call under a hard deadline.
///
/// Clients already pass the timeout to their HTTP layer; this also bounds
/// anything they do around it.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> ProviderResult<T>
where
    F: std::future::Future<Output = ProviderResult<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(ProviderError::Timeout(timeout)))
}

/// The provider clients available to a coordinator, keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: BTreeMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client for a provider (builder pattern).
    pub fn with(mut self, kind: ProviderKind, client: impl ProviderClient + 'static) -> Self {
        self.clients.insert(kind, Arc::new(client));
        self
    }

    /// Register an already shared client.
    pub fn with_shared(mut self, kind: ProviderKind, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(kind, client);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.get(&kind)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.clients.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.clients.iter().map(|(kind, client)| (kind, client.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ProviderKind::Wayback).unwrap(), "\"wayback\"");
        assert_eq!(
            serde_json::to_string(&ProviderKind::ArchiveToday).unwrap(),
            "\"archive_today\""
        );
        assert_eq!(ProviderKind::ArchiveToday.to_string(), "archive_today");
    }

    /// Implements only the required methods, so status lookups use the
    /// trait default.
    #[derive(Default)]
    struct PresenceOnly {
        checks: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for PresenceOnly {
        async fn check_presence(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> ProviderResult<PresenceResult> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(PresenceResult::found(format!("https://archive.mock/{url}")))
        }

        async fn submit(&self, _url: &str, _timeout: Duration) -> ProviderResult<SubmitReceipt> {
            Ok(SubmitReceipt::new())
        }
    }

    #[tokio::test]
    async fn test_default_status_lookup_falls_back_to_presence() {
        let provider = PresenceOnly::default();
        let status = provider
            .submission_status("https://example.com", "token-1", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(status.present);
        assert_eq!(provider.checks.load(Ordering::SeqCst), 1);
        assert_eq!(provider.name(), "unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_maps_elapsed_to_timeout() {
        let slow = MockProvider::new().with_delay(Duration::from_secs(30));
        let result = bounded(
            Duration::from_secs(2),
            slow.check_presence("https://example.com", Duration::from_secs(2)),
        )
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(d)) if d == Duration::from_secs(2)));
    }

    #[test]
    fn test_provider_set_builder() {
        let set = ProviderSet::new().with(ProviderKind::Wayback, MockProvider::new());

        assert!(set.contains(ProviderKind::Wayback));
        assert!(!set.contains(ProviderKind::ArchiveToday));
        assert_eq!(set.len(), 1);
    }
}
