//! SSRF protection for outbound webhooks.

pub mod webhook_policy;

pub use webhook_policy::WebhookPolicy;
