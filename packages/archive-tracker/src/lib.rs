//! Web Archive Submission Tracker
//!
//! Checks whether a URL is already held by public web archives, submits it
//! where it is missing, and tracks each submission in the background until
//! every provider confirms a snapshot or a maximum wait elapses.
//!
//! # Design Philosophy
//!
//! - Callers never block on archive indexing: `submit_async` returns a job id
//!   right after the first check
//! - Provider failures are values, not panics, and never fail a job
//! - Callback delivery is best-effort and never changes job state
//! - No hidden global state: the registry is owned by the coordinator
//!
//! # Usage
//!
//! ```rust,ignore
//! use archive_tracker::{SubmissionCoordinator, SubmitOptions, TrackerConfig};
//!
//! archive_tracker::logging::init();
//! let config = TrackerConfig::from_env()?;
//! let coordinator = SubmissionCoordinator::from_config(&config)?;
//!
//! // One synchronous round
//! let result = coordinator
//!     .check_and_submit("https://example.com", &config.check_options())
//!     .await;
//!
//! // Background tracking with a JSONL log of lifecycle events
//! let job_id = coordinator
//!     .submit_async(
//!         "https://example.com",
//!         config.submit_options().with_callback_file("/tmp/archive-events.jsonl"),
//!     )
//!     .await?;
//! let job = coordinator.get_job(&job_id)?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Provider client and webhook transport seams
//! - [`providers`] - Wayback Machine and archive.today clients
//! - [`coordinator`] - Check, submit and job creation
//! - [`monitor`] - Per-job polling state machine
//! - [`registry`] - Concurrent job table
//! - [`batch`] - Bounded fan-out over many URLs
//! - [`callbacks`] - JSONL file, webhook and in-process event sinks
//! - [`security`] - SSRF protection for webhooks
//! - [`types`] - Jobs, options, results and events
//! - [`testing`] - Mock implementations for testing

pub mod batch;
pub mod callbacks;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod providers;
pub mod registry;
pub mod security;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use batch::BatchRunner;
pub use callbacks::{CallbackDispatcher, ReqwestTransport};
pub use config::TrackerConfig;
pub use coordinator::SubmissionCoordinator;
pub use error::{
    CallbackError, ConfigError, ProviderError, Result, SecurityError, TrackerError,
};
pub use monitor::JobMonitor;
pub use providers::{ArchiveTodayClient, WaybackClient};
pub use registry::{JobRegistry, MonitorState, SharedRegistry};
pub use security::WebhookPolicy;
pub use traits::{ProviderClient, ProviderKind, ProviderSet, WebhookTransport};
pub use types::{
    event::{CallbackEvent, EventKind, EventPayload},
    job::{ArchiveState, CallbackConfig, Job, JobId, JobStatus, ProviderState},
    options::{CheckOptions, SubmitOptions},
    result::{
        BatchResult, BatchSummary, CheckResult, PresenceResult, ProviderCheck, Recommendation,
        ResultStatus, SubmitReceipt, SubmitResult,
    },
};
