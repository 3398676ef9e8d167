//! Callback sinks: in-process observers, JSONL file and webhook.

pub mod dispatcher;
pub mod file_sink;
pub mod webhook;

pub use dispatcher::{CallbackDispatcher, DEFAULT_WEBHOOK_TIMEOUT};
pub use webhook::ReqwestTransport;
