//! Webhook transport seam.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::CallbackResult;

/// Delivers one JSON document to a webhook endpoint.
///
/// Split out from the dispatcher so the SSRF policy can be tested against a
/// fake transport that records (or forbids) calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` to `url`, returning the HTTP status on success.
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> CallbackResult<u16>;
}
