//! Instance admission integration tests.
//!
//! Tests that the admission gate bounds concurrent executions when execution
//! contexts race on separate tasks, and that a simple dispatch tick built on
//! the registry honours coalescing and run budgets.

use crate::common::{at, callables};
use chrono::TimeDelta;
use recur::testing::{CallCounter, StepTrigger};
use recur::{Job, JobError, JobId, JobRegistry, StoreId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_executions_respect_max_instances() {
    const ATTEMPTS: usize = 16;

    let job = Job::builder(
        StepTrigger::new(at(0, 0, 0), TimeDelta::minutes(1)),
        CallCounter::new().callable(),
    )
    .id("busy")
    .max_instances(3)
    .build(&callables())
    .unwrap();
    let gate = job.instance_gate();

    let attempts = Arc::new(AtomicUsize::new(0));
    let admitted = Arc::new(AtomicUsize::new(0));
    let (release, released) = watch::channel(false);

    let mut tasks = Vec::new();
    for _ in 0..ATTEMPTS {
        let gate = Arc::clone(&gate);
        let attempts = Arc::clone(&attempts);
        let admitted = Arc::clone(&admitted);
        let mut released = released.clone();
        tasks.push(tokio::spawn(async move {
            let permit = gate.acquire();
            attempts.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = permit {
                admitted.fetch_add(1, Ordering::SeqCst);
                released.wait_for(|go| *go).await.unwrap();
                drop(permit);
            }
        }));
    }

    while attempts.load(Ordering::SeqCst) < ATTEMPTS {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(admitted.load(Ordering::SeqCst), 3);
    assert_eq!(job.instances(), 3);
    assert!(matches!(
        job.add_instance(),
        Err(JobError::MaxInstancesReached { max_instances: 3, .. })
    ));

    release.send(true).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(job.instances(), 0);
}

#[test]
fn test_admission_scenario_with_two_slots() {
    let job = Job::builder(
        StepTrigger::new(at(0, 0, 0), TimeDelta::minutes(1)),
        "mail:send_digest",
    )
    .max_instances(2)
    .build(&callables())
    .unwrap();

    job.add_instance().unwrap();
    job.add_instance().unwrap();
    assert_eq!(job.instances(), 2);

    assert!(job.add_instance().is_err());
    assert_eq!(job.instances(), 2);

    job.remove_instance();
    job.add_instance().unwrap();
    assert_eq!(job.instances(), 2);
}

/// One pass of a minimal dispatch loop: run due jobs inline.
fn tick(registry: &JobRegistry<StepTrigger>, now: chrono::DateTime<chrono::Utc>) {
    for (store, id, run_times) in registry.due_run_times(now).unwrap() {
        registry
            .with_job_mut(&id, &store, |job| {
                let runs = if job.coalesce() { 1 } else { run_times.len() };
                for _ in 0..runs {
                    let Ok(permit) = job.instance_gate().acquire() else {
                        break;
                    };
                    job.func().call(job.args(), job.kwargs()).unwrap();
                    drop(permit);
                    if job.record_run().is_err() {
                        break;
                    }
                }
                job.compute_next_run_time(now);
            })
            .unwrap();
    }
}

#[test]
fn test_dispatch_tick_coalesces_missed_runs() {
    let counter = CallCounter::new();
    let registry = Arc::new(JobRegistry::new(Arc::new(callables())));
    let job = Job::builder(
        StepTrigger::new(at(10, 0, 0), TimeDelta::minutes(1)),
        counter.callable(),
    )
    .id("heartbeat")
    .build(&callables())
    .unwrap();
    registry.add_job(job, "default").unwrap();
    registry.start(at(9, 59, 0)).unwrap();

    // Five fire times elapsed while nobody looked.
    tick(&registry, at(10, 4, 30));
    assert_eq!(counter.count(), 1);

    let handle = registry
        .handle(&JobId::new("heartbeat"), &StoreId::default())
        .unwrap();
    assert_eq!(handle.runs(), 1);
    assert_eq!(handle.next_run_time(), Some(at(10, 5, 0)));
}

#[test]
fn test_dispatch_tick_runs_each_missed_time_within_budget() {
    let counter = CallCounter::new();
    let registry = Arc::new(JobRegistry::new(Arc::new(callables())));
    let job = Job::builder(
        StepTrigger::new(at(10, 0, 0), TimeDelta::minutes(1)),
        counter.callable(),
    )
    .id("batch")
    .coalesce(false)
    .max_runs(3)
    .build(&callables())
    .unwrap();
    registry.add_job(job, "default").unwrap();
    registry.start(at(9, 59, 0)).unwrap();

    tick(&registry, at(10, 10, 0));
    assert_eq!(counter.count(), 3);

    let handle = registry
        .handle(&JobId::new("batch"), &StoreId::default())
        .unwrap();
    assert_eq!(handle.runs(), 3);
    assert_eq!(handle.next_run_time(), None);

    // Retired: later ticks find nothing due.
    tick(&registry, at(12, 0, 0));
    assert_eq!(counter.count(), 3);
}

