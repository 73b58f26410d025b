//! Versioned persisted form of a job.
//!
//! A snapshot carries everything needed to rebuild a [`Job`] except the
//! resolved callable (re-resolved from its reference on load) and the
//! in-flight instance count (process-local, always zero after a load).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::callable::CallableResolver;
use super::instances::InstanceGate;
use super::job::{Job, JobError, normalize_max_runs, validate_max_instances};
use super::trigger::Trigger;
use super::types::JobId;

/// Highest snapshot version this build reads and the one it writes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted job record, layout version 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot<T> {
    pub version: u32,
    pub id: JobId,
    pub func_ref: String,
    pub trigger: T,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub name: String,
    pub misfire_grace_time: Option<Duration>,
    pub coalesce: bool,
    pub max_runs: Option<u32>,
    pub max_instances: usize,
    pub runs: u32,
    pub next_run_time: Option<DateTime<Utc>>,
}

/// Accept only layouts this build has a reader for.
fn check_version(version: u64) -> Result<(), JobError> {
    // One arm per layout ever written.
    match version {
        1 => Ok(()),
        found => Err(JobError::UnsupportedVersion {
            found,
            supported: SNAPSHOT_VERSION,
        }),
    }
}

impl<T: DeserializeOwned> JobSnapshot<T> {
    /// Decode a snapshot, checking `version` before trusting any other field.
    pub fn decode(value: Value) -> Result<Self, JobError> {
        let version = value
            .get("version")
            .ok_or(JobError::MissingVersion)?
            .as_u64()
            .ok_or_else(|| JobError::Serialization("version must be an unsigned integer".into()))?;

        check_version(version)?;
        serde_json::from_value(value).map_err(|e| JobError::Serialization(e.to_string()))
    }
}

impl<T: Serialize> JobSnapshot<T> {
    /// Encode as a JSON value.
    pub fn encode(&self) -> Result<Value, JobError> {
        serde_json::to_value(self).map_err(|e| JobError::Serialization(e.to_string()))
    }
}

impl<T: Trigger + Clone> Job<T> {
    /// Capture the persistable state of this job.
    ///
    /// Fails for in-memory jobs whose callable has no textual reference.
    pub fn to_snapshot(&self) -> Result<JobSnapshot<T>, JobError> {
        let func_ref = self
            .func_ref
            .clone()
            .ok_or_else(|| JobError::NotSerializable(self.id.clone()))?;

        Ok(JobSnapshot {
            version: SNAPSHOT_VERSION,
            id: self.id.clone(),
            func_ref,
            trigger: self.trigger.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            name: self.name.clone(),
            misfire_grace_time: self.misfire_grace_time,
            coalesce: self.coalesce,
            max_runs: self.max_runs,
            max_instances: self.gate.max_instances(),
            runs: self.runs,
            next_run_time: self.next_run_time,
        })
    }
}

impl<T: Trigger> Job<T> {
    /// Rebuild a job from a snapshot, re-resolving its callable.
    pub fn from_snapshot(
        snapshot: JobSnapshot<T>,
        resolver: &dyn CallableResolver,
    ) -> Result<Self, JobError> {
        check_version(u64::from(snapshot.version))?;
        validate_max_instances(snapshot.max_instances)?;
        if let Some(max_runs) = normalize_max_runs(snapshot.max_runs)
            && snapshot.runs > max_runs
        {
            return Err(JobError::InvalidConfig(format!(
                "runs ({}) exceeds max_runs ({})",
                snapshot.runs, max_runs
            )));
        }
        let func = resolver.resolve(&snapshot.func_ref)?;

        Ok(Job {
            id: snapshot.id,
            func,
            func_ref: Some(snapshot.func_ref),
            trigger: snapshot.trigger,
            args: snapshot.args,
            kwargs: snapshot.kwargs,
            name: snapshot.name,
            misfire_grace_time: snapshot.misfire_grace_time,
            coalesce: snapshot.coalesce,
            max_runs: normalize_max_runs(snapshot.max_runs),
            runs: snapshot.runs,
            gate: Arc::new(InstanceGate::new(snapshot.max_instances)),
            next_run_time: snapshot.next_run_time,
        })
    }
}

impl<T: Trigger + Clone + Serialize> Job<T> {
    /// Snapshot encoded as a JSON value.
    pub fn to_value(&self) -> Result<Value, JobError> {
        self.to_snapshot()?.encode()
    }
}

impl<T: Trigger + DeserializeOwned> Job<T> {
    /// Rebuild a job from a JSON-encoded snapshot.
    pub fn from_value(value: Value, resolver: &dyn CallableResolver) -> Result<Self, JobError> {
        Self::from_snapshot(JobSnapshot::decode(value)?, resolver)
    }
}
