//! Snapshot persistence integration tests.
//!
//! Tests that jobs survive a trip through their persisted form and land in a
//! fresh registry with the same timing state.

use crate::common::{at, callables, digest_job, registry};
use recur::testing::noop_callable;
use recur::{
    Job, JobError, JobId, JobSnapshot, SNAPSHOT_VERSION, Schedule, StoreId, Trigger,
};
use serde_json::{Value, json};
use std::time::Duration;

fn persisted_text(job: &Job<Schedule>) -> String {
    serde_json::to_string(&job.to_value().unwrap()).unwrap()
}

#[tokio::test]
async fn test_jobs_survive_restart() {
    // First process: schedule, run once, persist.
    let first = registry();
    let job = Job::builder(Schedule::new("*/15 * * * *").unwrap(), "ops:rotate_logs")
        .id("rotate")
        .name("Rotate logs")
        .arg("/var/log/app")
        .kwarg("keep", 7)
        .misfire_grace_time(None)
        .max_runs(96)
        .max_instances(3)
        .build(&callables())
        .unwrap();
    first.add_job(job, "ops").unwrap();
    first.start(at(9, 0, 0)).unwrap();

    let ops = StoreId::new("ops");
    let id = JobId::new("rotate");
    let gate = first.instance_gate(&id, &ops).unwrap();
    let _in_flight = gate.acquire().unwrap();

    let text = first
        .with_job_mut(&id, &ops, |job| {
            job.record_run().unwrap();
            job.compute_next_run_time(at(9, 15, 0));
            persisted_text(job)
        })
        .unwrap();

    // Second process: reload into an empty registry, already running.
    let value: Value = serde_json::from_str(&text).unwrap();
    let restored: Job<Schedule> = Job::from_value(value, &callables()).unwrap();
    let second = registry();
    second.start(at(9, 20, 0)).unwrap();
    let handle = second.add_job(restored, "ops").unwrap();

    assert_eq!(handle.id().as_str(), "rotate");
    assert_eq!(handle.name(), "Rotate logs");
    assert_eq!(handle.func_ref(), Some("ops:rotate_logs"));
    assert_eq!(handle.args(), &[json!("/var/log/app")]);
    assert_eq!(handle.kwargs().get("keep"), Some(&json!(7)));
    assert_eq!(handle.misfire_grace_time(), None);
    assert_eq!(handle.max_runs(), Some(96));
    assert_eq!(handle.max_instances(), 3);
    assert_eq!(handle.runs(), 1);
    // Kept from the snapshot rather than recomputed on add.
    assert_eq!(handle.next_run_time(), Some(at(9, 30, 0)));
    // In-flight executions never cross a restart.
    assert_eq!(handle.instances(), 0);
}

#[test]
fn test_missed_fire_times_after_reload() {
    let mut job = digest_job("digest", "*/10 * * * *");
    job.compute_next_run_time(at(10, 5, 0));
    let value = job.to_value().unwrap();

    let restored: Job<Schedule> = Job::from_value(value, &callables()).unwrap();
    assert_eq!(
        restored.get_run_times(at(10, 45, 0)),
        vec![at(10, 10, 0), at(10, 20, 0), at(10, 30, 0), at(10, 40, 0)]
    );
}

#[test]
fn test_snapshot_layout() {
    let mut job = digest_job("digest", "0 8 * * *");
    job.compute_next_run_time(at(7, 0, 0));

    let snapshot = job.to_snapshot().unwrap();
    assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.func_ref, "mail:send_digest");

    let value = snapshot.encode().unwrap();
    let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    for expected in [
        "version",
        "id",
        "func_ref",
        "trigger",
        "args",
        "kwargs",
        "name",
        "misfire_grace_time",
        "coalesce",
        "max_runs",
        "max_instances",
        "runs",
        "next_run_time",
    ] {
        assert!(keys.iter().any(|k| k == expected), "missing {}", expected);
    }
    assert!(!keys.iter().any(|k| k == "instances"));
}

#[test]
fn test_in_memory_job_cannot_be_persisted() {
    let job = Job::builder(Schedule::new("@hourly").unwrap(), noop_callable())
        .id("adhoc")
        .build(&callables())
        .unwrap();

    assert!(!job.is_serializable());
    assert!(matches!(
        job.to_value(),
        Err(JobError::NotSerializable(_))
    ));
}

#[test]
fn test_newer_snapshot_rejected() {
    let mut value = digest_job("digest", "@daily").to_value().unwrap();
    value["version"] = json!(SNAPSHOT_VERSION + 1);

    let err = Job::<Schedule>::from_value(value, &callables()).unwrap_err();
    assert!(matches!(err, JobError::UnsupportedVersion { .. }));
    assert!(err.to_string().contains("unsupported job snapshot version"));
}

#[test]
fn test_snapshot_decodes_without_resolver() {
    let value = digest_job("digest", "@every 90s").to_value().unwrap();
    let snapshot = JobSnapshot::<Schedule>::decode(value).unwrap();

    assert_eq!(snapshot.trigger.expression(), "@every 90s");
    assert_eq!(snapshot.misfire_grace_time, Some(Duration::from_secs(1)));
    assert_eq!(
        snapshot.trigger.next_fire_time(at(0, 0, 0)),
        Some(at(0, 1, 30))
    );
}
