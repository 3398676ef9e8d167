//! Typed errors for the archive tracker.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure kind instead of string-sniffing.

use thiserror::Error;

use crate::traits::provider::ProviderKind;
use crate::types::job::JobId;

/// Errors surfaced by the public tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The URL to archive could not be accepted
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// An option value was out of range or inconsistent
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Every provider was switched off
    #[error("no providers enabled")]
    NoProvidersEnabled,

    /// An enabled provider has no client registered
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(ProviderKind),

    /// No job with this id exists in the registry
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Provider client could not be constructed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Webhook transport could not be constructed
    #[error("callback error: {0}")]
    Callback(#[from] CallbackError),
}

/// Errors returned across the provider client boundary.
///
/// Clients never panic or raise past this boundary: every transport, status
/// and parsing failure is folded into one of these kinds.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Provider answered with an unexpected status code
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Provider asked us to back off
    #[error("rate limited by provider")]
    RateLimited,

    /// Response did not have the expected shape
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return ProviderError::RateLimited;
        }
        ProviderError::Http(Box::new(err))
    }
}

/// Security-related errors, primarily for SSRF protection of webhooks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked by name (e.g., localhost, *.internal)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP in blocked CIDR range (e.g., 10.0.0.0/8)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Errors delivering a callback event. Always logged and discarded.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Webhook destination rejected by policy
    #[error("webhook blocked: {0}")]
    Blocked(#[from] SecurityError),

    /// Webhook POST failed
    #[error("webhook delivery failed: {0}")]
    Delivery(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Webhook answered with a non-success status
    #[error("webhook returned HTTP {0}")]
    Status(u16),

    /// JSONL append failed
    #[error("callback file error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be encoded
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors loading [`TrackerConfig`](crate::config::TrackerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable present but unparseable
    #[error("{key} must be {expected}, got {value:?}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type alias for security operations.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

/// Result type alias for callback delivery.
pub type CallbackResult<T> = std::result::Result<T, CallbackError>;
