//! Observability tests
//!
//! Installs the global subscriber once (this file is its own test binary)
//! and checks that controller diagnostics land in the configured log file.

#![cfg(feature = "observability")]

use parallel_jobs::observability::{self, LogTarget, ObservabilityConfig};
use parallel_jobs::{BasicJob, BoxError, JobContext, JobController};
use tracing::Level;

#[tokio::test]
async fn test_file_target_receives_controller_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.log");

    observability::init(ObservabilityConfig {
        level: Level::DEBUG,
        target: LogTarget::File(path.to_string_lossy().into_owned()),
    })
    .unwrap();

    let ctrl = JobController::default();
    let jobs = [
        BasicJob::new(|_ctx| async { Ok::<_, BoxError>(()) }),
        BasicJob::new(|_ctx| async { Ok::<_, BoxError>(()) }),
    ];
    ctrl.do_all(&JobContext::new(), jobs).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("parallel_do_all"), "log was: {contents}");
    assert!(contents.contains("batch completed"), "log was: {contents}");

    let again = observability::init(ObservabilityConfig::default());
    assert!(again.is_err(), "a second global subscriber must be rejected");
}
