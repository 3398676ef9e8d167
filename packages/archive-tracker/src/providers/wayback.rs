//! Internet Archive Wayback Machine client.
//!
//! - Presence: the availability API (`archived_snapshots.closest`)
//! - Submit: Save Page Now, asking for a JSON answer so a job id comes back
//! - Status: the Save Page Now status endpoint, keyed by that job id

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::provider::ProviderClient;
use crate::types::result::{PresenceResult, SubmitReceipt};

pub const AVAILABILITY_ENDPOINT: &str = "https://archive.org/wayback/available";
pub const SAVE_ENDPOINT: &str = "https://web.archive.org/save/";
pub const STATUS_ENDPOINT: &str = "https://web.archive.org/save/status/";
pub const SNAPSHOT_BASE: &str = "https://web.archive.org";

#[derive(Debug, Default, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<Snapshot>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    available: bool,
    url: String,
    timestamp: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SaveResponse {
    job_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    timestamp: Option<String>,
    original_url: Option<String>,
    message: Option<String>,
}

/// Wayback Machine provider client.
pub struct WaybackClient {
    client: reqwest::Client,
    user_agent: String,
    availability_endpoint: String,
    save_endpoint: String,
    status_endpoint: String,
}

impl WaybackClient {
    /// Create a client with the public endpoints.
    pub fn new() -> ProviderResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            availability_endpoint: AVAILABILITY_ENDPOINT.to_string(),
            save_endpoint: SAVE_ENDPOINT.to_string(),
            status_endpoint: STATUS_ENDPOINT.to_string(),
        })
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Point every endpoint at another host (mirrors, test servers).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.availability_endpoint = format!("{base}/wayback/available");
        self.save_endpoint = format!("{base}/save/");
        self.status_endpoint = format!("{base}/save/status/");
        self
    }
}

fn check_status(status: reqwest::StatusCode) -> ProviderResult<()> {
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    Ok(())
}

/// Availability API links are often plain http; upgrade them.
fn normalize_snapshot_url(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

pub(crate) fn parse_availability(body: &str) -> ProviderResult<PresenceResult> {
    let response: AvailabilityResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Protocol(e.to_string()))?;

    match response.archived_snapshots.closest {
        Some(snapshot)
            if snapshot.available
                && snapshot.status.as_deref().map_or(true, |s| s.starts_with('2')) =>
        {
            let mut result = PresenceResult::found(normalize_snapshot_url(&snapshot.url));
            result.timestamp = snapshot.timestamp;
            Ok(result)
        }
        _ => Ok(PresenceResult::absent()),
    }
}

pub(crate) fn parse_save_response(
    content_location: Option<&str>,
    body: &str,
) -> ProviderResult<SubmitReceipt> {
    let parsed: SaveResponse = serde_json::from_str(body).unwrap_or_default();

    if parsed.status.as_deref() == Some("error") {
        return Err(ProviderError::Protocol(
            parsed.message.unwrap_or_else(|| "save request rejected".into()),
        ));
    }

    let mut receipt = SubmitReceipt::new();
    if let Some(location) = content_location.filter(|l| l.starts_with("/web/")) {
        receipt = receipt.with_archive_url(format!("{SNAPSHOT_BASE}{location}"));
    }
    if let Some(job_id) = parsed.job_id {
        receipt = receipt.with_token(job_id);
    }
    Ok(receipt)
}

pub(crate) fn parse_status(body: &str, token: &str) -> ProviderResult<PresenceResult> {
    let response: StatusResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Protocol(e.to_string()))?;

    match response.status.as_str() {
        "success" => {
            let (Some(timestamp), Some(original)) = (response.timestamp, response.original_url)
            else {
                return Err(ProviderError::Protocol(
                    "success status without timestamp or original_url".into(),
                ));
            };
            Ok(
                PresenceResult::found(format!("{SNAPSHOT_BASE}/web/{timestamp}/{original}"))
                    .with_timestamp(timestamp)
                    .with_token(token),
            )
        }
        "pending" => Ok(PresenceResult::absent().with_token(token)),
        _ => Err(ProviderError::Protocol(
            response.message.unwrap_or_else(|| format!("status {}", response.status)),
        )),
    }
}

#[async_trait]
impl ProviderClient for WaybackClient {
    async fn check_presence(&self, url: &str, timeout: Duration) -> ProviderResult<PresenceResult> {
        debug!(url = %url, "Wayback availability check");
        let response = self
            .client
            .get(&self.availability_endpoint)
            .query(&[("url", url)])
            .header("User-Agent", &self.user_agent)
            .timeout(timeout)
            .send()
            .await?;
        check_status(response.status())?;

        let body = response.text().await?;
        parse_availability(&body)
    }

    async fn submit(&self, url: &str, timeout: Duration) -> ProviderResult<SubmitReceipt> {
        debug!(url = %url, "Wayback save request");
        let response = self
            .client
            .get(format!("{}{}", self.save_endpoint, url))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await?;
        check_status(response.status()).inspect_err(|e| {
            warn!(url = %url, error = %e, "Wayback save rejected");
        })?;

        let content_location = response
            .headers()
            .get("content-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        parse_save_response(content_location.as_deref(), &body)
    }

    async fn submission_status(
        &self,
        url: &str,
        token: &str,
        timeout: Duration,
    ) -> ProviderResult<PresenceResult> {
        debug!(url = %url, token = %token, "Wayback save status lookup");
        let response = self
            .client
            .get(format!("{}{}", self.status_endpoint, token))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await?;
        check_status(response.status())?;

        let body = response.text().await?;
        parse_status(&body, token)
    }

    fn name(&self) -> &str {
        "wayback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_available_snapshot() {
        let body = r#"{
            "url": "example.com",
            "archived_snapshots": {
                "closest": {
                    "status": "200",
                    "available": true,
                    "url": "http://web.archive.org/web/20240101000000/https://example.com/",
                    "timestamp": "20240101000000"
                }
            }
        }"#;

        let result = parse_availability(body).unwrap();
        assert!(result.present);
        assert_eq!(
            result.archive_url.as_deref(),
            Some("https://web.archive.org/web/20240101000000/https://example.com/")
        );
        assert_eq!(result.timestamp.as_deref(), Some("20240101000000"));
    }

    #[test]
    fn test_parse_no_snapshot() {
        let body = r#"{"url": "example.com/nothing", "archived_snapshots": {}}"#;
        assert!(!parse_availability(body).unwrap().present);
    }

    #[test]
    fn test_parse_non_200_snapshot_is_absent() {
        let body = r#"{"archived_snapshots": {"closest": {
            "status": "404", "available": true,
            "url": "http://web.archive.org/web/1/x", "timestamp": "1"}}}"#;
        assert!(!parse_availability(body).unwrap().present);
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        assert!(matches!(
            parse_availability("<html>busy</html>"),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[test]
    fn test_save_response_with_job_id() {
        let receipt = parse_save_response(
            Some("/web/20240101000000/https://example.com/"),
            r#"{"url": "https://example.com", "job_id": "spn2-abc"}"#,
        )
        .unwrap();

        assert_eq!(receipt.token.as_deref(), Some("spn2-abc"));
        assert_eq!(
            receipt.archive_url.as_deref(),
            Some("https://web.archive.org/web/20240101000000/https://example.com/")
        );
    }

    #[test]
    fn test_save_response_error() {
        let result = parse_save_response(None, r#"{"status": "error", "message": "blocked"}"#);
        assert!(matches!(result, Err(ProviderError::Protocol(m)) if m == "blocked"));
    }

    #[test]
    fn test_save_response_html_body_is_accepted() {
        let receipt = parse_save_response(None, "<html>Saving page now</html>").unwrap();
        assert!(receipt.token.is_none());
        assert!(receipt.archive_url.is_none());
    }

    #[test]
    fn test_status_success_builds_snapshot_url() {
        let body = r#"{"status": "success", "timestamp": "20240101000000",
                       "original_url": "https://example.com/"}"#;
        let result = parse_status(body, "spn2-abc").unwrap();

        assert!(result.present);
        assert_eq!(
            result.archive_url.as_deref(),
            Some("https://web.archive.org/web/20240101000000/https://example.com/")
        );
    }

    #[test]
    fn test_status_pending_and_error() {
        let pending = parse_status(r#"{"status": "pending"}"#, "t").unwrap();
        assert!(!pending.present);
        assert_eq!(pending.token.as_deref(), Some("t"));

        assert!(parse_status(r#"{"status": "error", "message": "timeout"}"#, "t").is_err());
    }

    #[test]
    fn test_with_base_url() {
        let client = WaybackClient::new().unwrap().with_base_url("http://mirror.test/");
        assert_eq!(client.availability_endpoint, "http://mirror.test/wayback/available");
        assert_eq!(client.status_endpoint, "http://mirror.test/save/status/");
    }
}
