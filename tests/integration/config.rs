//! Configuration integration tests.
//!
//! Tests that load a jobs directory from disk and schedule its contents.

use crate::common::{at, callables, registry};
use chrono::{TimeZone, Utc};
use recur::{
    ConfigError, Job, JobId, Schedule, StoreId, load_global_config, load_jobs_from_directory,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn jobs_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

fn load(dir: &Path) -> Result<Vec<recur::ConfiguredJob>, ConfigError> {
    let global = load_global_config(dir)?;
    load_jobs_from_directory(dir, &callables(), &global)
}

#[tokio::test]
async fn test_directory_into_running_registry() {
    let dir = jobs_dir(&[
        (
            "recur.yaml",
            "default_timezone: Europe/Paris\nmisfire_grace_time: 30\n",
        ),
        (
            "digest.yaml",
            r#"
id: digest
name: Morning digest
func: mail:send_digest
schedule: "0 9 * * *"
kwargs:
  recipients: [ops@example.com]
"#,
        ),
        (
            "rotate.yml",
            r#"
id: rotate
func: ops:rotate_logs
schedule:
  cron: "@hourly"
  timezone: UTC
  start: 2024-06-01T00:00:00Z
args: [/var/log/app]
misfire_grace_time: unbounded
max_runs: 24
store: ops
"#,
        ),
    ]);

    let registry = registry();
    for configured in load(dir.path()).unwrap() {
        registry.add_job(configured.job, configured.store).unwrap();
    }
    registry.start(at(0, 0, 0)).unwrap();

    let digest = registry
        .handle(&JobId::new("digest"), &StoreId::default())
        .unwrap();
    assert_eq!(digest.name(), "Morning digest");
    assert_eq!(digest.trigger().timezone(), "Europe/Paris");
    assert_eq!(digest.misfire_grace_time(), Some(Duration::from_secs(30)));
    // 09:00 CEST
    assert_eq!(digest.next_run_time(), Some(at(7, 0, 0)));

    let rotate = registry
        .handle(&JobId::new("rotate"), &StoreId::new("ops"))
        .unwrap();
    assert_eq!(rotate.name(), "rotate_logs");
    assert_eq!(rotate.misfire_grace_time(), None);
    assert_eq!(rotate.max_runs(), Some(24));
    assert_eq!(
        rotate.next_run_time(),
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    );
}

#[test]
fn test_same_id_in_different_stores() {
    let dir = jobs_dir(&[
        (
            "a.yaml",
            "id: nightly\nfunc: mail:send_digest\nschedule: '@daily'\n",
        ),
        (
            "b.yaml",
            "id: nightly\nfunc: ops:rotate_logs\nschedule: '@daily'\nstore: ops\n",
        ),
    ]);

    let jobs = load(dir.path()).unwrap();
    let stores: Vec<_> = jobs.iter().map(|c| c.store.as_str()).collect();
    assert_eq!(stores, vec!["default", "ops"]);
}

#[test]
fn test_configured_job_persists() {
    let dir = jobs_dir(&[(
        "digest.yaml",
        "id: digest\nfunc: mail:send_digest\nschedule: '*/5 * * * *'\nmax_instances: 4\n",
    )]);

    let mut job = load(dir.path()).unwrap().remove(0).job;
    job.compute_next_run_time(at(12, 1, 0));

    let restored: Job<Schedule> = Job::from_value(job.to_value().unwrap(), &callables()).unwrap();
    assert_eq!(restored.view(), job.view());
    assert_eq!(restored.next_run_time(), Some(at(12, 5, 0)));
    assert_eq!(restored.max_instances(), 4);
}

#[test]
fn test_first_failing_file_is_reported() {
    let dir = jobs_dir(&[
        (
            "good.yaml",
            "id: good\nfunc: mail:send_digest\nschedule: '@daily'\n",
        ),
        (
            "bad.yaml",
            "id: bad\nfunc: mail:send_digest\nschedule: '@daily'\nmax_instances: 0\n",
        ),
    ]);

    let err = load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("bad.yaml"), "{}", err);
}

#[test]
fn test_malformed_global_config() {
    let dir = jobs_dir(&[("recur.yaml", "misfire_grace_time: sometimes\n")]);
    assert!(load_global_config(dir.path()).is_err());
}

#[test]
fn test_unresolvable_reference_rejected() {
    let dir = jobs_dir(&[(
        "orphan.yaml",
        "func: mail:send_newsletter\nschedule: '@weekly'\n",
    )]);

    let err = load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::JobFileError { .. }));
}
