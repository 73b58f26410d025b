//! Job handle integration tests.
//!
//! Tests that verify handles see a coherent copy of a job and route every
//! change through the registry that owns it.

use crate::common::{at, digest_job, registry};
use recur::{JobChanges, JobError, JobId, Schedule, SchedulerError, StoreId};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn test_handle_reflects_job_at_creation() {
    let registry = registry();
    let handle = registry.add_job(digest_job("digest", "0 8 * * *"), "mail").unwrap();

    assert_eq!(handle.id().as_str(), "digest");
    assert_eq!(handle.store().as_str(), "mail");
    assert_eq!(handle.name(), "send_digest");
    assert_eq!(handle.func_ref(), Some("mail:send_digest"));
    assert_eq!(handle.trigger(), &Schedule::new("0 8 * * *").unwrap());
    assert_eq!(handle.misfire_grace_time(), Some(Duration::from_secs(1)));
    assert!(handle.coalesce());
    assert_eq!(handle.max_instances(), 1);
    assert_eq!(handle.runs(), 0);
    assert_eq!(handle.instances(), 0);
    assert_eq!(handle.next_run_time(), None);
}

#[tokio::test]
async fn test_pending_until_registry_starts() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "mail").unwrap();
    assert!(handle.pending().await.unwrap());

    registry.start(at(7, 30, 0)).unwrap();
    assert!(!handle.pending().await.unwrap());

    // Still the copy taken before start
    assert_eq!(handle.next_run_time(), None);
    handle.refresh().await.unwrap();
    assert_eq!(handle.next_run_time(), Some(at(8, 0, 0)));
}

#[tokio::test]
async fn test_handle_is_stale_until_refreshed() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    registry.start(at(7, 0, 0)).unwrap();

    registry
        .with_job_mut(handle.id(), handle.store(), |job| {
            job.record_run().unwrap();
            job.compute_next_run_time(at(8, 0, 0));
        })
        .unwrap();
    assert_eq!(handle.runs(), 0);

    handle.refresh().await.unwrap();
    assert_eq!(handle.runs(), 1);
    assert_eq!(
        handle.next_run_time(),
        Some(at(8, 0, 0) + chrono::TimeDelta::days(1))
    );
}

#[tokio::test]
async fn test_modify_matches_fresh_refresh() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    registry.start(at(7, 0, 0)).unwrap();

    handle
        .modify(
            JobChanges::new()
                .name("Morning digest")
                .args(vec![Value::from("team@example.com")])
                .coalesce(false)
                .misfire_grace_time(Some(Duration::from_secs(120)))
                .max_runs(Some(30))
                .max_instances(2)
                .next_run_time(Some(at(9, 0, 0))),
        )
        .await
        .unwrap();

    assert_eq!(handle.name(), "Morning digest");
    assert_eq!(handle.args(), &[Value::from("team@example.com")]);
    assert!(!handle.coalesce());
    assert_eq!(handle.misfire_grace_time(), Some(Duration::from_secs(120)));
    assert_eq!(handle.max_runs(), Some(30));
    assert_eq!(handle.max_instances(), 2);
    assert_eq!(handle.next_run_time(), Some(at(9, 0, 0)));

    let fresh = registry.handle(handle.id(), handle.store()).unwrap();
    assert_eq!(fresh.view(), handle.view());
}

#[tokio::test]
async fn test_modify_follows_renamed_id() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    registry.start(at(7, 0, 0)).unwrap();

    handle
        .modify(JobChanges::new().id("digest-v2"))
        .await
        .unwrap();

    assert_eq!(handle.id().as_str(), "digest-v2");
    assert_eq!(handle.view().id.as_str(), "digest-v2");
    assert!(matches!(
        registry.handle(&JobId::new("digest"), &StoreId::default()),
        Err(SchedulerError::JobNotFound { .. })
    ));

    // Later operations use the new id.
    handle.refresh().await.unwrap();
    handle.remove().await.unwrap();
    assert!(registry.jobs(&StoreId::default(), false).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_modify_leaves_handle_and_job_unchanged() {
    let registry = registry();
    registry.add_job(digest_job("taken", "@daily"), "default").unwrap();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();

    let result = handle
        .modify(JobChanges::new().id("taken").name("clash"))
        .await;
    assert!(matches!(result, Err(SchedulerError::ConflictingId(_))));
    assert_eq!(handle.id().as_str(), "digest");
    assert_eq!(handle.name(), "send_digest");

    let result = handle
        .modify(JobChanges::new().name("broken").func("mail:unknown"))
        .await;
    assert!(matches!(
        result,
        Err(SchedulerError::Job(JobError::Reference(_)))
    ));

    handle.refresh().await.unwrap();
    assert_eq!(handle.name(), "send_digest");
    assert_eq!(handle.func_ref(), Some("mail:send_digest"));
}

#[tokio::test]
async fn test_refresh_failure_keeps_previous_state() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    let before = handle.view().clone();

    registry
        .remove_job(&JobId::new("digest"), &StoreId::default())
        .unwrap();

    let result = handle.refresh().await;
    assert!(matches!(result, Err(SchedulerError::JobNotFound { .. })));
    assert_eq!(handle.view(), &before);
}

#[tokio::test]
async fn test_remove_through_handle() {
    let registry = registry();
    let handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();

    handle.remove().await.unwrap();

    assert!(!handle.pending().await.unwrap());
    assert!(matches!(
        handle.remove().await,
        Err(SchedulerError::JobNotFound { .. })
    ));
}

#[tokio::test]
async fn test_handle_outliving_registry() {
    let registry = registry();
    let mut handle = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    drop(registry);

    assert_eq!(handle.name(), "send_digest");
    assert!(matches!(
        handle.refresh().await,
        Err(SchedulerError::SchedulerGone)
    ));
    assert!(matches!(
        handle.remove().await,
        Err(SchedulerError::SchedulerGone)
    ));
}

#[tokio::test]
async fn test_handles_compare_by_id() {
    let registry = registry();
    let first = registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    registry.start(at(7, 0, 0)).unwrap();

    let second = registry.handle(first.id(), first.store()).unwrap();
    assert_ne!(first.view(), second.view());
    assert_eq!(first, second);

    let other = registry.add_job(digest_job("other", "0 8 * * *"), "default").unwrap();
    assert_ne!(first, other);
}

#[tokio::test]
async fn test_handle_display() {
    let registry = registry();
    registry.add_job(digest_job("digest", "0 8 * * *"), "default").unwrap();
    registry.start(at(7, 0, 0)).unwrap();

    let handle = registry
        .handle(&JobId::new("digest"), &StoreId::default())
        .unwrap();
    assert_eq!(
        handle.to_string(),
        "send_digest (trigger: 0 8 * * *, next run at: 2024-05-01 08:00:00 UTC)"
    );
}
