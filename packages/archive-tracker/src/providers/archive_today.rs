//! archive.today client.
//!
//! archive.today has no lookup API. Presence is inferred from the
//! `/newest/<url>` shortcut: when a snapshot exists the site redirects to
//! its short id, otherwise it answers 404. This is an approximate heuristic,
//! not a guaranteed lookup; mirrors and CAPTCHA pages can produce false
//! negatives, and callers should treat `present == false` as "not confirmed".

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::provider::ProviderClient;
use crate::types::result::{PresenceResult, SubmitReceipt};

pub const DEFAULT_BASE_URL: &str = "https://archive.ph";

/// Site paths that share the short-id shape but are not snapshots.
const RESERVED_PATHS: [&str; 7] = ["submit", "newest", "oldest", "search", "timegate", "timemap", "wip"];

/// archive.today provider client.
pub struct ArchiveTodayClient {
    client: reqwest::Client,
    user_agent: String,
    base_url: String,
}

impl ArchiveTodayClient {
    /// Create a client against the default mirror.
    ///
    /// Redirects are disabled: the redirect target *is* the answer.
    pub fn new() -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Use another mirror (archive.is, archive.li, ...).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Resolve a possibly relative `Location` against the mirror.
fn resolve(base: &str, location: &str) -> Option<Url> {
    Url::parse(base).ok()?.join(location).ok()
}

/// Whether a URL looks like a snapshot page (`/<short id>` or `/wip/<short id>`).
pub(crate) fn is_snapshot_url(url: &Url) -> bool {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let id = match segments.as_slice() {
        [id] => id,
        ["wip", id] => id,
        _ => return false,
    };
    (4..=10).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric())
        && !RESERVED_PATHS.contains(id)
}

/// Pull the target out of a `Refresh: 0;url=...` header.
pub(crate) fn parse_refresh(value: &str) -> Option<&str> {
    let lower = value.to_ascii_lowercase();
    let index = lower.find("url=")?;
    Some(value[index + 4..].trim().trim_matches(|c| c == '"' || c == '\''))
}

fn snapshot_from_headers(base: &str, headers: &HeaderMap) -> Option<String> {
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("refresh")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_refresh)
                .map(str::to_string)
        })?;
    let resolved = resolve(base, &location)?;
    is_snapshot_url(&resolved).then(|| resolved.to_string())
}

#[async_trait]
impl ProviderClient for ArchiveTodayClient {
    async fn check_presence(&self, url: &str, timeout: Duration) -> ProviderResult<PresenceResult> {
        let probe = format!("{}/newest/{}", self.base_url, url);
        debug!(url = %url, probe = %probe, "archive.today newest probe");

        let response = self
            .client
            .get(&probe)
            .header("User-Agent", &self.user_agent)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();

        if status.is_redirection() {
            return Ok(match snapshot_from_headers(&self.base_url, response.headers()) {
                Some(snapshot) => PresenceResult::found(snapshot),
                None => PresenceResult::absent(),
            });
        }
        match status.as_u16() {
            200 => Ok(PresenceResult::found(probe)),
            404 => Ok(PresenceResult::absent()),
            429 => Err(ProviderError::RateLimited),
            code => Err(ProviderError::Status(code)),
        }
    }

    async fn submit(&self, url: &str, timeout: Duration) -> ProviderResult<SubmitReceipt> {
        debug!(url = %url, "archive.today submit");
        let response = self
            .client
            .post(format!("{}/submit/", self.base_url))
            .header("User-Agent", &self.user_agent)
            .form(&[("url", url)])
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !(status.is_success() || status.is_redirection()) {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let mut receipt = SubmitReceipt::new();
        if let Some(snapshot) = snapshot_from_headers(&self.base_url, response.headers()) {
            receipt = receipt.with_archive_url(snapshot);
        }
        Ok(receipt)
    }

    fn name(&self) -> &str {
        "archive_today"
    }
}
