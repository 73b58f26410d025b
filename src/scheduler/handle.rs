//! Caller-facing job handle.
//!
//! A [`JobHandle`] is a read-only copy of a job's fields taken at its last
//! refresh. It never changes the job itself: removal and modification are
//! routed through the scheduler that owns the job.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::core::job::{JobChanges, JobView, datetime_repr};
use crate::core::trigger::Trigger;
use crate::core::types::{JobId, StoreId};

use super::types::{Scheduler, SchedulerError};

/// Refreshable, read-only view of a scheduled job.
///
/// Fields can only be read. There are no setters, so assigning to a field
/// does not compile:
///
/// ```compile_fail
/// use recur::{JobHandle, Schedule};
///
/// fn rename(handle: &mut JobHandle<Schedule>) {
///     handle.view.name = "renamed".to_string();
/// }
/// ```
///
/// Use [`JobHandle::modify`] to change the job instead.
pub struct JobHandle<T: Trigger + 'static> {
    scheduler: Weak<dyn Scheduler<T>>,
    store: StoreId,
    id: JobId,
    view: JobView<T>,
}

impl<T: Trigger + 'static> JobHandle<T> {
    /// Create a handle over `view`, routing writes to `scheduler`.
    pub fn new(scheduler: &Arc<dyn Scheduler<T>>, store: StoreId, view: JobView<T>) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
            store,
            id: view.id.clone(),
            view,
        }
    }

    fn scheduler(&self) -> Result<Arc<dyn Scheduler<T>>, SchedulerError> {
        self.scheduler.upgrade().ok_or(SchedulerError::SchedulerGone)
    }

    /// Ask the scheduler to remove the job. The handle goes stale.
    pub async fn remove(&self) -> Result<(), SchedulerError> {
        self.scheduler()?
            .unschedule_job(&self.id, &self.store)
            .await
    }

    /// Ask the scheduler to change the job, then refresh this handle.
    ///
    /// If the change renames the job, the handle follows the new id even when
    /// the refresh afterwards fails.
    pub async fn modify(&mut self, changes: JobChanges<T>) -> Result<(), SchedulerError> {
        let new_id = changes.new_id().cloned();
        self.scheduler()?
            .modify_job(&self.id, &self.store, changes)
            .await?;

        if let Some(id) = new_id {
            self.id = id;
        }
        self.refresh().await
    }

    /// Re-read every field from the scheduler.
    ///
    /// Either all fields are replaced by one coherent state of the job or,
    /// on error, none are.
    pub async fn refresh(&mut self) -> Result<(), SchedulerError> {
        let view = self.scheduler()?.get_job(&self.id, &self.store).await?;
        self.view = view;
        Ok(())
    }

    /// Whether the job is still waiting for its first scheduling pass.
    pub async fn pending(&self) -> Result<bool, SchedulerError> {
        let pending = self.scheduler()?.get_jobs(&self.store, true).await?;
        Ok(pending.iter().any(|job| job.id == self.id))
    }

    /// Get the job ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the store the job lives in.
    pub fn store(&self) -> &StoreId {
        &self.store
    }

    /// All fields as of the last refresh.
    pub fn view(&self) -> &JobView<T> {
        &self.view
    }

    /// Get the textual callable reference, if one exists.
    pub fn func_ref(&self) -> Option<&str> {
        self.view.func_ref.as_deref()
    }

    /// Get the trigger.
    pub fn trigger(&self) -> &T {
        &self.view.trigger
    }

    /// Get the positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.view.args
    }

    /// Get the keyword arguments.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.view.kwargs
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.view.name
    }

    /// Get the misfire grace time (`None` = unbounded).
    pub fn misfire_grace_time(&self) -> Option<Duration> {
        self.view.misfire_grace_time
    }

    /// Whether missed fire times collapse into one execution.
    pub fn coalesce(&self) -> bool {
        self.view.coalesce
    }

    /// Get the cap on total executions.
    pub fn max_runs(&self) -> Option<u32> {
        self.view.max_runs
    }

    /// Get the cap on concurrent executions.
    pub fn max_instances(&self) -> usize {
        self.view.max_instances
    }

    /// Completed executions.
    pub fn runs(&self) -> u32 {
        self.view.runs
    }

    /// In-flight executions.
    pub fn instances(&self) -> usize {
        self.view.instances
    }

    /// When the job is next due.
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.view.next_run_time
    }
}

impl<T: Trigger + 'static> PartialEq for JobHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Trigger + 'static> Eq for JobHandle<T> {}

impl<T: Trigger + 'static> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("name", &self.view.name)
            .field("store", &self.store)
            .finish()
    }
}

impl<T: Trigger + fmt::Display + 'static> fmt::Display for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (trigger: {}, next run at: {})",
            self.view.name,
            self.view.trigger,
            datetime_repr(self.view.next_run_time)
        )
    }
}
