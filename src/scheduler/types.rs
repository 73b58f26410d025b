//! Scheduler type definitions.
//!
//! This module contains the error type and the interface job handles use to
//! reach the scheduler that owns their job.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::job::{JobChanges, JobError, JobView};
use crate::core::trigger::Trigger;
use crate::core::types::{JobId, StoreId};

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found.
    #[error("no job with id '{id}' in store '{store}'")]
    JobNotFound { id: JobId, store: StoreId },

    /// Store not found.
    #[error("no job store named '{0}'")]
    StoreNotFound(StoreId),

    /// Another job in the store already uses the id.
    #[error("job id '{0}' is already in use")]
    ConflictingId(JobId),

    /// The scheduler a handle points at no longer exists.
    #[error("the scheduler owning this job has been dropped")]
    SchedulerGone,

    /// Scheduler state lock was poisoned.
    #[error("scheduler lock poisoned")]
    LockPoisoned,

    /// The job rejected an operation.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Operations a [`JobHandle`](super::JobHandle) delegates to the scheduler owning its job.
#[async_trait]
pub trait Scheduler<T: Trigger + 'static>: Send + Sync {
    /// Remove a job so it never runs again.
    async fn unschedule_job(&self, id: &JobId, store: &StoreId) -> Result<(), SchedulerError>;

    /// Apply field changes to a job.
    async fn modify_job(
        &self,
        id: &JobId,
        store: &StoreId,
        changes: JobChanges<T>,
    ) -> Result<(), SchedulerError>;

    /// Current state of one job.
    async fn get_job(&self, id: &JobId, store: &StoreId) -> Result<JobView<T>, SchedulerError>;

    /// Jobs in a store; with `pending`, only those still waiting for their first scheduling pass.
    async fn get_jobs(
        &self,
        store: &StoreId,
        pending: bool,
    ) -> Result<Vec<JobView<T>>, SchedulerError>;
}
