//! Claim exclusivity across concurrent claimants sharing one SQLite file

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, TempDb};
use provisioning_core::domain::{JobSpec, JobState, SyncJobOptions};
use provisioning_core::port::time_provider::SystemTimeProvider;
use provisioning_core::port::ListSelector;

const LEASE: Duration = Duration::from_secs(30);

/// Many claimants racing over the same jobs: each job is claimed exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_share_a_job() {
    let db = TempDb::new().await;
    let clock = Arc::new(SystemTimeProvider);
    let inserter = db.store(clock.clone(), LEASE);
    for i in 0..10 {
        inserter
            .insert("ns", JobSpec::sync(format!("repo-{i}"), SyncJobOptions::default()))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        // Separate store per claimant, as separate processes would have
        let store = db.store(clock.clone(), LEASE);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match store.claim().await {
                    Ok((job, guard)) => {
                        guard.disarm();
                        claimed.push(job.key());
                        tokio::task::yield_now().await;
                    }
                    Err(e) if e.is_no_jobs() => return claimed,
                    Err(e) => panic!("claim failed: {e}"),
                }
            }
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();

    assert_eq!(all.len(), 10, "every job claimed exactly once: {all:?}");
    assert_eq!(unique.len(), 10);

    let remaining = inserter
        .records()
        .list(&ListSelector::unclaimed(100))
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

/// A claim whose guard is dropped goes back to the pool
#[tokio::test]
async fn test_dropped_guard_releases_claim() {
    let db = TempDb::new().await;
    let store = db.store(Arc::new(SystemTimeProvider), LEASE);
    store
        .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
        .await
        .unwrap();

    let (job, guard) = store.claim().await.unwrap();
    assert_eq!(job.status.state, JobState::Working);
    drop(guard);

    let released = eventually(|| {
        let store = store.clone();
        let key = job.key();
        async move {
            store
                .records()
                .get(&key)
                .await
                .map(|j| !j.is_claimed())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(released, "dropped guard should release the claim");

    let (again, guard) = store.claim().await.unwrap();
    assert_eq!(again.uid, job.uid);
    assert_eq!(again.status.state, JobState::Working);
    guard.rollback().await;

    let stored = store.records().get(&job.key()).await.unwrap();
    assert_eq!(stored.status.state, JobState::Pending);
    assert!(stored.status.started.is_none());
}

/// A stale copy cannot overwrite a newer claim
#[tokio::test]
async fn test_stale_update_conflicts() {
    let db = TempDb::new().await;
    let store = db.store(Arc::new(SystemTimeProvider), LEASE);
    store
        .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
        .await
        .unwrap();

    let (job, guard) = store.claim().await.unwrap();
    guard.disarm();

    let mut first = job.clone();
    first.status.message = "first".into();
    store.update(&first).await.unwrap();

    let mut stale = job;
    stale.status.message = "stale".into();
    let err = store.update(&stale).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
}
