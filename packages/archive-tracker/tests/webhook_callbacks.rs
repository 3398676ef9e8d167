//! Webhook delivery through the job lifecycle, including SSRF blocking.

use archive_tracker::testing::{MockProvider, RecordingTransport};
use archive_tracker::{
    CallbackDispatcher, JobStatus, ProviderKind, ProviderSet, SubmissionCoordinator,
    SubmitOptions,
};

const URL: &str = "https://example.com/page";

fn coordinator(transport: &RecordingTransport) -> SubmissionCoordinator {
    let providers = ProviderSet::new()
        .with(ProviderKind::Wayback, MockProvider::new().present(URL))
        .with(ProviderKind::ArchiveToday, MockProvider::new().present(URL));
    SubmissionCoordinator::new(providers, CallbackDispatcher::new(transport.clone()))
}

async fn run_job(coordinator: &SubmissionCoordinator, callback_url: &str) -> JobStatus {
    let job_id = coordinator
        .submit_async(URL, SubmitOptions::new().with_callback_url(callback_url))
        .await
        .unwrap();
    coordinator.registry().join_monitor(&job_id).await;
    coordinator.get_job(&job_id).unwrap().status
}

#[tokio::test]
async fn test_internal_targets_never_dispatched() {
    let blocked = [
        "http://127.0.0.1/hook",
        "http://127.8.9.10:9000/hook",
        "http://10.0.0.5/hook",
        "http://10.255.1.1/hook",
        "http://169.254.169.254/latest/meta-data",
        "http://localhost:8080/hook",
        "http://api.internal/hook",
        "http://printer.local/hook",
        "http://[::1]/hook",
        "http://[::ffff:10.0.0.1]/hook",
        "http://[::127.0.0.1]/hook",
        "http://[::169.254.169.254]/hook",
        "http://[100::1]/hook",
        "http://[fec0::1]/hook",
        "file:///etc/passwd",
    ];

    for target in blocked {
        let transport = RecordingTransport::new();
        let status = run_job(&coordinator(&transport), target).await;

        assert_eq!(status, JobStatus::Complete, "job affected by {target}");
        assert_eq!(transport.post_count(), 0, "dispatched to {target}");
    }
}

#[tokio::test]
async fn test_public_target_receives_every_event() {
    let transport = RecordingTransport::new();
    let status = run_job(&coordinator(&transport), "https://hooks.example.org/archive").await;
    assert_eq!(status, JobStatus::Complete);

    let posts = transport.posts();
    let events: Vec<&str> = posts
        .iter()
        .map(|(_, body)| body["event"].as_str().unwrap())
        .collect();
    assert_eq!(
        events,
        vec!["job_submitted", "provider_complete", "provider_complete", "job_complete"]
    );
    assert!(posts
        .iter()
        .all(|(url, body)| url.as_str() == "https://hooks.example.org/archive" && body["url"] == URL));
}
