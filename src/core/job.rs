//! Job definition: identity, trigger binding, admission and run bookkeeping.
//!
//! A [`Job`] is owned by the scheduler that created it. The scheduler is the
//! single writer of its timing state (`next_run_time`, `runs`); execution
//! contexts only touch the [`InstanceGate`].

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::callable::{Callable, CallableResolver, ReferenceError};
use super::instances::{InstanceGate, MaxInstancesReached};
use super::trigger::Trigger;
use super::types::JobId;

/// Step added to a fire time before asking the trigger for the following one.
const RUN_TIME_STEP_MICROS: i64 = 1;

/// Errors that can occur when working with jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// The callable argument was neither a callable nor a textual reference.
    #[error("func must be a callable or a textual reference to one (got {0})")]
    InvalidCallable(String),

    /// A textual reference could not be resolved.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Admission denied: the job already runs `max_instances` times.
    #[error("job '{id}' reached its maximum number of running instances ({max_instances})")]
    MaxInstancesReached { id: JobId, max_instances: usize },

    /// The job already ran `max_runs` times.
    #[error("job '{id}' already ran its maximum of {max_runs} times")]
    MaxRunsReached { id: JobId, max_runs: u32 },

    /// The job has no textual callable reference.
    #[error("job '{0}' cannot be serialized because the callable reference is missing")]
    NotSerializable(JobId),

    /// A snapshot without a version field.
    #[error("job snapshot has no version field")]
    MissingVersion,

    /// A snapshot from a newer (or unknown) format.
    #[error("unsupported job snapshot version {found} (this build reads up to version {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The callable argument accepted at construction.
#[derive(Debug, Clone)]
pub enum JobFunc {
    /// A textual `module:name` reference, resolved at construction.
    Reference(String),
    /// A callable handed over directly.
    Direct(Callable),
}

impl From<Callable> for JobFunc {
    fn from(callable: Callable) -> Self {
        JobFunc::Direct(callable)
    }
}

impl From<&str> for JobFunc {
    fn from(reference: &str) -> Self {
        JobFunc::Reference(reference.to_string())
    }
}

impl From<String> for JobFunc {
    fn from(reference: String) -> Self {
        JobFunc::Reference(reference)
    }
}

/// Untyped input (config files, RPC payloads) can only name a callable by reference.
impl TryFrom<Value> for JobFunc {
    type Error = JobError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(reference) => Ok(JobFunc::Reference(reference)),
            Value::Null => Err(JobError::InvalidCallable("null".into())),
            Value::Bool(_) => Err(JobError::InvalidCallable("a boolean".into())),
            Value::Number(_) => Err(JobError::InvalidCallable("a number".into())),
            Value::Array(_) => Err(JobError::InvalidCallable("a sequence".into())),
            Value::Object(_) => Err(JobError::InvalidCallable("a mapping".into())),
        }
    }
}

impl JobFunc {
    /// Resolve to the callable and, when one exists, its textual reference.
    fn resolve(
        self,
        resolver: &dyn CallableResolver,
    ) -> Result<(Callable, Option<String>), ReferenceError> {
        match self {
            JobFunc::Reference(reference) => {
                let callable = resolver.resolve(&reference)?;
                Ok((callable, Some(reference)))
            }
            JobFunc::Direct(callable) => {
                // No reference means an in-memory job that cannot be serialized.
                let reference = resolver.derive(&callable);
                Ok((callable, reference))
            }
        }
    }
}

/// Default policy values applied to jobs that don't set their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    /// Grace period for late executions (`None` = unbounded).
    pub misfire_grace_time: Option<Duration>,
    /// Collapse missed fire times into one execution.
    pub coalesce: bool,
    /// Cap on total executions (`None` = unbounded).
    pub max_runs: Option<u32>,
    /// Cap on concurrent executions.
    pub max_instances: usize,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            misfire_grace_time: Some(Duration::from_secs(1)),
            coalesce: true,
            max_runs: None,
            max_instances: 1,
        }
    }
}

/// A scheduled unit of work bound to a trigger.
pub struct Job<T> {
    pub(crate) id: JobId,
    pub(crate) func: Callable,
    pub(crate) func_ref: Option<String>,
    pub(crate) trigger: T,
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: Map<String, Value>,
    pub(crate) name: String,
    pub(crate) misfire_grace_time: Option<Duration>,
    pub(crate) coalesce: bool,
    pub(crate) max_runs: Option<u32>,
    pub(crate) runs: u32,
    pub(crate) gate: Arc<InstanceGate>,
    pub(crate) next_run_time: Option<DateTime<Utc>>,
}

impl<T: fmt::Debug> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("func_ref", &self.func_ref)
            .field("trigger", &self.trigger)
            .field("runs", &self.runs)
            .field("instances", &self.gate.instances())
            .field("max_instances", &self.gate.max_instances())
            .field("next_run_time", &self.next_run_time)
            .finish()
    }
}

impl<T: Trigger> Job<T> {
    /// Start building a job.
    pub fn builder(trigger: T, func: impl Into<JobFunc>) -> JobBuilder<T> {
        JobBuilder::new(trigger, func)
    }

    /// Get the job ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the callable.
    pub fn func(&self) -> &Callable {
        &self.func
    }

    /// Get the textual callable reference, if one exists.
    pub fn func_ref(&self) -> Option<&str> {
        self.func_ref.as_deref()
    }

    /// Whether the job can be turned into a snapshot.
    pub fn is_serializable(&self) -> bool {
        self.func_ref.is_some()
    }

    /// Get the trigger.
    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    /// Get the positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Get the keyword arguments.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the misfire grace time (`None` = unbounded).
    pub fn misfire_grace_time(&self) -> Option<Duration> {
        self.misfire_grace_time
    }

    /// Whether missed fire times collapse into one execution.
    pub fn coalesce(&self) -> bool {
        self.coalesce
    }

    /// Get the cap on total executions (`None` = unbounded).
    pub fn max_runs(&self) -> Option<u32> {
        self.max_runs
    }

    /// Get the cap on concurrent executions.
    pub fn max_instances(&self) -> usize {
        self.gate.max_instances()
    }

    /// Number of completed executions.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Number of executions currently in flight.
    pub fn instances(&self) -> usize {
        self.gate.instances()
    }

    /// When the job is next due, or `None` once retired.
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.next_run_time
    }

    fn run_budget_exhausted(&self, pending: usize) -> bool {
        self.max_runs
            .is_some_and(|max| self.runs as usize + pending >= max as usize)
    }

    /// Recompute `next_run_time` from the trigger, relative to `now`.
    ///
    /// Once a bounded `max_runs` is reached the job is retired and this
    /// returns `None` from then on.
    pub fn compute_next_run_time(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_run_time = if self.run_budget_exhausted(0) {
            None
        } else {
            self.trigger.next_fire_time(now)
        };
        self.next_run_time
    }

    /// Fire times in `[next_run_time, now]`, oldest first.
    ///
    /// Stops early once the run budget would be used up. Applying misfire
    /// policy to the result is the caller's business.
    pub fn get_run_times(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let step = TimeDelta::microseconds(RUN_TIME_STEP_MICROS);
        let mut run_times = Vec::new();
        let mut candidate = self.next_run_time;

        while let Some(run_time) = candidate {
            if run_time > now || self.run_budget_exhausted(run_times.len()) {
                break;
            }
            run_times.push(run_time);

            // The result must stay strictly increasing even if the trigger misbehaves.
            candidate = run_time
                .checked_add_signed(step)
                .and_then(|after| self.trigger.next_fire_time(after))
                .filter(|next| *next > run_time);
        }

        run_times
    }

    /// Admit one more concurrent execution.
    pub fn add_instance(&self) -> Result<(), JobError> {
        self.gate
            .add_instance()
            .map(|_| ())
            .map_err(|MaxInstancesReached { max_instances }| JobError::MaxInstancesReached {
                id: self.id.clone(),
                max_instances,
            })
    }

    /// Release one concurrent execution.
    ///
    /// # Panics
    ///
    /// Panics if no execution is in flight.
    pub fn remove_instance(&self) {
        self.gate.remove_instance();
    }

    /// Shared admission gate for execution contexts that outlive a borrow of the job.
    pub fn instance_gate(&self) -> Arc<InstanceGate> {
        Arc::clone(&self.gate)
    }

    /// Count one completed execution.
    pub fn record_run(&mut self) -> Result<u32, JobError> {
        if let Some(max_runs) = self.max_runs
            && self.runs >= max_runs
        {
            return Err(JobError::MaxRunsReached {
                id: self.id.clone(),
                max_runs,
            });
        }
        self.runs += 1;
        Ok(self.runs)
    }

    /// Apply a set of field changes.
    ///
    /// Everything is validated before anything is written: on error the job
    /// is unchanged.
    pub fn modify(
        &mut self,
        changes: JobChanges<T>,
        resolver: &dyn CallableResolver,
    ) -> Result<(), JobError> {
        let JobChanges {
            id,
            func,
            trigger,
            args,
            kwargs,
            name,
            misfire_grace_time,
            coalesce,
            max_runs,
            max_instances,
            next_run_time,
        } = changes;

        if let Some(id) = &id
            && id.as_str().is_empty()
        {
            return Err(JobError::InvalidConfig("id cannot be empty".into()));
        }
        let func = func.map(|f| f.resolve(resolver)).transpose()?;
        if let Some(max_runs) = max_runs.and_then(normalize_max_runs)
            && self.runs > max_runs
        {
            return Err(JobError::InvalidConfig(format!(
                "max_runs cannot drop to {} after {} runs",
                max_runs, self.runs
            )));
        }
        if let Some(max) = max_instances {
            validate_max_instances(max)?;
            // Last fallible step: the gate only changes when it succeeds.
            self.gate.set_max_instances(max).map_err(|in_flight| {
                JobError::InvalidConfig(format!(
                    "max_instances cannot drop to {} while {} instances are running",
                    max, in_flight
                ))
            })?;
        }

        if let Some(id) = id {
            self.id = id;
        }
        if let Some((callable, reference)) = func {
            self.func = callable;
            self.func_ref = reference;
        }
        if let Some(trigger) = trigger {
            self.trigger = trigger;
        }
        if let Some(args) = args {
            self.args = args;
        }
        if let Some(kwargs) = kwargs {
            self.kwargs = kwargs;
        }
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(grace) = misfire_grace_time {
            self.misfire_grace_time = grace;
        }
        if let Some(coalesce) = coalesce {
            self.coalesce = coalesce;
        }
        if let Some(max_runs) = max_runs {
            self.max_runs = normalize_max_runs(max_runs);
        }
        if let Some(next_run_time) = next_run_time {
            self.next_run_time = next_run_time;
        }

        Ok(())
    }
}

impl<T: Trigger + Clone> Job<T> {
    /// Frozen copy of the externally relevant fields.
    pub fn view(&self) -> JobView<T> {
        JobView {
            id: self.id.clone(),
            func_ref: self.func_ref.clone(),
            trigger: self.trigger.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            name: self.name.clone(),
            misfire_grace_time: self.misfire_grace_time,
            coalesce: self.coalesce,
            max_runs: self.max_runs,
            max_instances: self.gate.max_instances(),
            runs: self.runs,
            instances: self.gate.instances(),
            next_run_time: self.next_run_time,
        }
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Job<T> {}

impl<T: fmt::Display> fmt::Display for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (trigger: {}, next run at: {})",
            self.name,
            self.trigger,
            datetime_repr(self.next_run_time)
        )
    }
}

/// Render an optional instant the way job listings show it.
pub fn datetime_repr(instant: Option<DateTime<Utc>>) -> String {
    instant
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S %Z").to_string())
        .unwrap_or_else(|| "None".to_string())
}

pub(crate) fn normalize_max_runs(max_runs: Option<u32>) -> Option<u32> {
    max_runs.filter(|max| *max > 0)
}

pub(crate) fn validate_max_instances(max_instances: usize) -> Result<(), JobError> {
    if max_instances == 0 {
        return Err(JobError::InvalidConfig(
            "max_instances must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Externally relevant job fields at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView<T> {
    pub id: JobId,
    pub func_ref: Option<String>,
    pub trigger: T,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub name: String,
    pub misfire_grace_time: Option<Duration>,
    pub coalesce: bool,
    pub max_runs: Option<u32>,
    pub max_instances: usize,
    pub runs: u32,
    pub instances: usize,
    pub next_run_time: Option<DateTime<Utc>>,
}

/// A set of named field changes for [`Job::modify`].
///
/// Fields left unset keep their current value.
#[derive(Debug, Clone)]
pub struct JobChanges<T> {
    id: Option<JobId>,
    func: Option<JobFunc>,
    trigger: Option<T>,
    args: Option<Vec<Value>>,
    kwargs: Option<Map<String, Value>>,
    name: Option<String>,
    misfire_grace_time: Option<Option<Duration>>,
    coalesce: Option<bool>,
    max_runs: Option<Option<u32>>,
    max_instances: Option<usize>,
    next_run_time: Option<Option<DateTime<Utc>>>,
}

impl<T> Default for JobChanges<T> {
    fn default() -> Self {
        Self {
            id: None,
            func: None,
            trigger: None,
            args: None,
            kwargs: None,
            name: None,
            misfire_grace_time: None,
            coalesce: None,
            max_runs: None,
            max_instances: None,
            next_run_time: None,
        }
    }
}

impl<T> JobChanges<T> {
    /// An empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename the job's id.
    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replace the callable.
    pub fn func(mut self, func: impl Into<JobFunc>) -> Self {
        self.func = Some(func.into());
        self
    }

    /// Replace the trigger.
    pub fn trigger(mut self, trigger: T) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Replace the positional arguments.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    /// Replace the keyword arguments.
    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    /// Change the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Change the misfire grace time (`None` = unbounded).
    pub fn misfire_grace_time(mut self, grace: Option<Duration>) -> Self {
        self.misfire_grace_time = Some(grace);
        self
    }

    /// Change the coalesce policy.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = Some(coalesce);
        self
    }

    /// Change the cap on total executions (`None` or `Some(0)` = unbounded).
    pub fn max_runs(mut self, max_runs: Option<u32>) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Change the cap on concurrent executions.
    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = Some(max_instances);
        self
    }

    /// Override the next run time.
    pub fn next_run_time(mut self, next_run_time: Option<DateTime<Utc>>) -> Self {
        self.next_run_time = Some(next_run_time);
        self
    }

    /// The new id, if this change set renames the job.
    pub fn new_id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    /// Whether the change set replaces the trigger.
    pub fn replaces_trigger(&self) -> bool {
        self.trigger.is_some()
    }

    /// Whether the change set sets `next_run_time` explicitly.
    pub fn sets_next_run_time(&self) -> bool {
        self.next_run_time.is_some()
    }

    /// Whether the change set changes nothing.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.func.is_none()
            && self.trigger.is_none()
            && self.args.is_none()
            && self.kwargs.is_none()
            && self.name.is_none()
            && self.misfire_grace_time.is_none()
            && self.coalesce.is_none()
            && self.max_runs.is_none()
            && self.max_instances.is_none()
            && self.next_run_time.is_none()
    }
}

/// Builder for creating jobs with a fluent API.
pub struct JobBuilder<T> {
    trigger: T,
    func: JobFunc,
    id: Option<JobId>,
    name: Option<String>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    misfire_grace_time: Option<Duration>,
    coalesce: bool,
    max_runs: Option<u32>,
    max_instances: usize,
}

impl<T: Trigger> JobBuilder<T> {
    /// Create a new job builder using [`JobDefaults::default`].
    pub fn new(trigger: T, func: impl Into<JobFunc>) -> Self {
        let defaults = JobDefaults::default();
        Self {
            trigger,
            func: func.into(),
            id: None,
            name: None,
            args: Vec::new(),
            kwargs: Map::new(),
            misfire_grace_time: defaults.misfire_grace_time,
            coalesce: defaults.coalesce,
            max_runs: defaults.max_runs,
            max_instances: defaults.max_instances,
        }
    }

    /// Take policy values from `defaults`.
    pub fn defaults(mut self, defaults: &JobDefaults) -> Self {
        self.misfire_grace_time = defaults.misfire_grace_time;
        self.coalesce = defaults.coalesce;
        self.max_runs = defaults.max_runs;
        self.max_instances = defaults.max_instances;
        self
    }

    /// Set the job id. An empty id is replaced by a generated one.
    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set all positional arguments.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set all keyword arguments.
    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Add one keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Set the misfire grace time (`None` = unbounded).
    pub fn misfire_grace_time(mut self, grace: Option<Duration>) -> Self {
        self.misfire_grace_time = grace;
        self
    }

    /// Set the coalesce policy.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Cap total executions. Zero means unbounded.
    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Cap concurrent executions.
    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Build the job, resolving the callable through `resolver`.
    pub fn build(self, resolver: &dyn CallableResolver) -> Result<Job<T>, JobError> {
        validate_max_instances(self.max_instances)?;
        let (func, func_ref) = self.func.resolve(resolver)?;

        let id = self
            .id
            .filter(|id| !id.as_str().is_empty())
            .unwrap_or_else(JobId::generate);
        let name = self.name.unwrap_or_else(|| func.name().to_string());

        Ok(Job {
            id,
            func,
            func_ref,
            trigger: self.trigger,
            args: self.args,
            kwargs: self.kwargs,
            name,
            misfire_grace_time: self.misfire_grace_time,
            coalesce: self.coalesce,
            max_runs: normalize_max_runs(self.max_runs),
            runs: 0,
            gate: Arc::new(InstanceGate::new(self.max_instances)),
            next_run_time: None,
        })
    }
}
