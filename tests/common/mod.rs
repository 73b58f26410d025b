//! Common test utilities shared across integration tests.

use chrono::{DateTime, TimeZone, Utc};
use recur::{CallError, CallableRegistry, Job, JobRegistry, Schedule};
use serde_json::{Map, Value};
use std::sync::Arc;

fn send_digest(_args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, CallError> {
    Ok(Value::Null)
}

fn rotate_logs(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, CallError> {
    Ok(Value::from(args.len()))
}

/// Resolver with the references used across the suite.
pub fn callables() -> CallableRegistry {
    CallableRegistry::new()
        .with("mail:send_digest", send_digest)
        .and_then(|r| r.with("ops:rotate_logs", rotate_logs))
        .expect("references are well formed")
}

/// An empty registry resolving through [`callables`].
pub fn registry() -> Arc<JobRegistry<Schedule>> {
    Arc::new(JobRegistry::new(Arc::new(callables())))
}

/// A job bound to `expression`, calling `mail:send_digest`.
pub fn digest_job(id: &str, expression: &str) -> Job<Schedule> {
    Job::builder(Schedule::new(expression).unwrap(), "mail:send_digest")
        .id(id)
        .build(&callables())
        .unwrap()
}

/// An instant on 2024-05-01.
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}
