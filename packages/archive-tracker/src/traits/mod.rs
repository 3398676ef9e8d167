//! Core trait abstractions.

pub mod provider;
pub mod transport;

pub use provider::{ProviderClient, ProviderKind, ProviderSet};
pub use transport::WebhookTransport;
