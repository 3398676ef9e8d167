//! reqwest-backed webhook transport.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{CallbackError, CallbackResult};
use crate::traits::transport::WebhookTransport;

/// Posts events with a shared `reqwest::Client`.
///
/// Redirects are not followed: a public webhook answering with a redirect to
/// an internal address would otherwise bypass the policy check.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestTransport {
    /// Create a transport with default settings.
    pub fn new() -> CallbackResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CallbackError::Delivery(Box::new(e)))?;
        Ok(Self {
            client,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        })
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> CallbackResult<u16> {
        let response = self
            .client
            .post(url.clone())
            .header("User-Agent", &self.user_agent)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| CallbackError::Delivery(Box::new(e)))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Webhook delivered");
        if !status.is_success() {
            return Err(CallbackError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}
