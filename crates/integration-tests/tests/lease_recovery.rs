//! Expired lease recovery against SQLite: store cleanup and the standalone
//! expiry controller

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TempDb;
use provisioning_core::application::ExpiredJobCleanupController;
use provisioning_core::domain::{
    labels, JobSpec, JobState, PullRequestJobOptions, SyncJobOptions, LEASE_EXPIRED_MESSAGE,
};
use provisioning_core::error::AppError;
use provisioning_core::port::time_provider::MockTimeProvider;
use provisioning_infra_sqlite::SqliteHistoryWriter;
use tokio_test::assert_ok;

const LEASE: Duration = Duration::from_secs(30);
const START: i64 = 1_700_000_000_000;

#[tokio::test]
async fn test_cleanup_reclaims_abandoned_jobs_into_history() {
    let db = TempDb::new().await;
    let clock = Arc::new(MockTimeProvider::new(START));
    let history = Arc::new(SqliteHistoryWriter::new(db.pool.clone()));
    let store = db.store(clock.clone(), LEASE).with_history(history.clone());

    store
        .insert("ns", JobSpec::sync("abandoned", SyncJobOptions::default()))
        .await
        .unwrap();
    let (crashed, guard) = store.claim().await.unwrap();
    guard.disarm();

    clock.advance_millis(10_000);
    store
        .insert("ns", JobSpec::sync("healthy", SyncJobOptions::default()))
        .await
        .unwrap();
    let (mut healthy, guard) = store.claim().await.unwrap();
    guard.disarm();

    // Only the first claim is older than the lease
    clock.advance_millis(25_000);
    assert_ok!(store.renew_lease(&mut healthy).await);

    let stats = store.cleanup().await.unwrap();
    assert_eq!(stats.reclaimed, 1);
    assert!(store.records().get(&crashed.key()).await.is_err());
    assert!(store.records().get(&healthy.key()).await.is_ok());

    let archived = history
        .find_by_original_uid("ns", &crashed.uid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.status.state, JobState::Error);
    assert_eq!(archived.status.message, LEASE_EXPIRED_MESSAGE);
    assert!(!archived.labels.contains_key(labels::CLAIM));

    // The crashed worker's late renewal must notice it lost the job
    let mut late = crashed;
    let err = store.renew_lease(&mut late).await.unwrap_err();
    assert!(matches!(err, AppError::LeaseLost(_)), "{err}");
}

#[tokio::test]
async fn test_controller_sweeps_with_separate_history() {
    let db = TempDb::new().await;
    let clock = Arc::new(MockTimeProvider::new(START));
    let history = Arc::new(SqliteHistoryWriter::new(db.pool.clone()));
    // Store without history: archival belongs to the controller
    let store = db.store(clock.clone(), LEASE);

    for number in 1..=3 {
        store
            .insert(
                "ns",
                JobSpec::pull_request(
                    "repo",
                    PullRequestJobOptions {
                        number,
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();
        let (_, guard) = store.claim().await.unwrap();
        guard.disarm();
    }
    clock.advance_millis(LEASE.as_millis() as i64 + 1);

    let controller = ExpiredJobCleanupController::new(store.clone(), Some(history.clone()));
    let stats = controller.sweep().await.unwrap();
    assert_eq!(stats.reclaimed, 3);
    assert_eq!(stats.failed, 0);

    let archived = history.list_history("ns", "repo", 10).await.unwrap();
    assert_eq!(archived.len(), 3);
    assert!(archived
        .iter()
        .all(|job| job.status.state == JobState::Error));

    assert_eq!(controller.sweep().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_insert_rejects_duplicate_outstanding_job() {
    let db = TempDb::new().await;
    let store = db.store(Arc::new(MockTimeProvider::new(START)), LEASE);

    store
        .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
        .await
        .unwrap();
    let err = store
        .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
        .await
        .unwrap_err();
    assert!(err.is_already_exists(), "{err}");

    // Same repository in another namespace is independent
    assert_ok!(
        store
            .insert("other", JobSpec::sync("repo", SyncJobOptions::default()))
            .await
    );
}
