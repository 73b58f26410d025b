//! In-memory job registry.
//!
//! Owns jobs grouped by store alias. Jobs added before [`JobRegistry::start`]
//! wait in a pending list and get their first `next_run_time` when the
//! registry starts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::callable::CallableResolver;
use crate::core::instances::InstanceGate;
use crate::core::job::{Job, JobChanges, JobView};
use crate::core::trigger::Trigger;
use crate::core::types::{JobId, StoreId};

use super::handle::JobHandle;
use super::types::{Scheduler, SchedulerError};

struct RegistryState<T> {
    running: bool,
    pending: Vec<(StoreId, Job<T>)>,
    stores: HashMap<StoreId, HashMap<JobId, Job<T>>>,
}

impl<T: Trigger> RegistryState<T> {
    fn new() -> Self {
        let mut stores = HashMap::new();
        stores.insert(StoreId::default(), HashMap::new());
        Self {
            running: false,
            pending: Vec::new(),
            stores,
        }
    }

    fn contains(&self, id: &JobId, store: &StoreId) -> bool {
        self.job(id, store).is_some()
    }

    fn job(&self, id: &JobId, store: &StoreId) -> Option<&Job<T>> {
        self.stores
            .get(store)
            .and_then(|jobs| jobs.get(id))
            .or_else(|| {
                self.pending
                    .iter()
                    .find(|(s, job)| s == store && job.id() == id)
                    .map(|(_, job)| job)
            })
    }

    fn job_mut(&mut self, id: &JobId, store: &StoreId) -> Option<&mut Job<T>> {
        if let Some(job) = self.stores.get_mut(store).and_then(|jobs| jobs.get_mut(id)) {
            return Some(job);
        }
        self.pending
            .iter_mut()
            .find(|(s, job)| s == store && job.id() == id)
            .map(|(_, job)| job)
    }
}

fn not_found(id: &JobId, store: &StoreId) -> SchedulerError {
    SchedulerError::JobNotFound {
        id: id.clone(),
        store: store.clone(),
    }
}

/// Thread-safe in-memory registry of jobs.
pub struct JobRegistry<T> {
    resolver: Arc<dyn CallableResolver>,
    state: RwLock<RegistryState<T>>,
}

impl<T: Trigger + Clone + 'static> JobRegistry<T> {
    /// Create an empty registry that resolves callable references through `resolver`.
    pub fn new(resolver: Arc<dyn CallableResolver>) -> Self {
        Self {
            resolver,
            state: RwLock::new(RegistryState::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState<T>>, SchedulerError> {
        self.state.read().map_err(|_| SchedulerError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState<T>>, SchedulerError> {
        self.state.write().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// The resolver used for callable references in job changes.
    pub fn resolver(&self) -> &dyn CallableResolver {
        self.resolver.as_ref()
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_running(&self) -> Result<bool, SchedulerError> {
        Ok(self.read()?.running)
    }

    /// Add a job to `store` and hand back a handle to it.
    ///
    /// Before the registry starts the job is pending. Afterwards it is
    /// scheduled right away, computing `next_run_time` from the current time
    /// unless the job already carries one.
    pub fn add_job(
        self: &Arc<Self>,
        mut job: Job<T>,
        store: impl Into<StoreId>,
    ) -> Result<JobHandle<T>, SchedulerError> {
        let store = store.into();
        let view = {
            let mut state = self.write()?;
            if state.contains(job.id(), &store) {
                return Err(SchedulerError::ConflictingId(job.id().clone()));
            }

            if state.running {
                if job.next_run_time().is_none() {
                    job.compute_next_run_time(Utc::now());
                }
                let view = job.view();
                state
                    .stores
                    .entry(store.clone())
                    .or_default()
                    .insert(job.id().clone(), job);
                view
            } else {
                let view = job.view();
                state.stores.entry(store.clone()).or_default();
                state.pending.push((store.clone(), job));
                view
            }
        };

        tracing::info!(
            job_id = %view.id,
            store = %store,
            next_run_time = ?view.next_run_time,
            "Added job"
        );
        Ok(self.wrap(store, view))
    }

    /// Schedule every pending job relative to `now`.
    ///
    /// Returns how many jobs left the pending list. Calling it again once
    /// running is a no-op.
    pub fn start(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let mut state = self.write()?;
        if state.running {
            return Ok(0);
        }
        state.running = true;

        let pending = std::mem::take(&mut state.pending);
        let count = pending.len();
        for (store, mut job) in pending {
            if job.next_run_time().is_none() {
                job.compute_next_run_time(now);
            }
            tracing::debug!(
                job_id = %job.id(),
                store = %store,
                next_run_time = ?job.next_run_time(),
                "Scheduled pending job"
            );
            state
                .stores
                .entry(store)
                .or_default()
                .insert(job.id().clone(), job);
        }

        tracing::info!(jobs = count, "Job registry started");
        Ok(count)
    }

    /// Handle for a job the registry already owns.
    pub fn handle(
        self: &Arc<Self>,
        id: &JobId,
        store: &StoreId,
    ) -> Result<JobHandle<T>, SchedulerError> {
        let view = self.view_of(id, store)?;
        Ok(self.wrap(store.clone(), view))
    }

    fn wrap(self: &Arc<Self>, store: StoreId, view: JobView<T>) -> JobHandle<T> {
        let scheduler: Arc<dyn Scheduler<T>> = self.clone();
        JobHandle::new(&scheduler, store, view)
    }

    fn view_of(&self, id: &JobId, store: &StoreId) -> Result<JobView<T>, SchedulerError> {
        self.read()?
            .job(id, store)
            .map(Job::view)
            .ok_or_else(|| not_found(id, store))
    }

    /// Run `f` against a job as its single timing writer.
    ///
    /// This is how a scheduling loop recomputes `next_run_time`, enumerates
    /// run times or records finished runs.
    pub fn with_job_mut<R>(
        &self,
        id: &JobId,
        store: &StoreId,
        f: impl FnOnce(&mut Job<T>) -> R,
    ) -> Result<R, SchedulerError> {
        let mut state = self.write()?;
        let job = state.job_mut(id, store).ok_or_else(|| not_found(id, store))?;
        Ok(f(job))
    }

    /// Admission gate of a job, for execution contexts on other tasks.
    pub fn instance_gate(
        &self,
        id: &JobId,
        store: &StoreId,
    ) -> Result<Arc<InstanceGate>, SchedulerError> {
        self.read()?
            .job(id, store)
            .map(Job::instance_gate)
            .ok_or_else(|| not_found(id, store))
    }

    /// Fire times that elapsed up to `now`, for every scheduled job that has any.
    pub fn due_run_times(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(StoreId, JobId, Vec<DateTime<Utc>>)>, SchedulerError> {
        let state = self.read()?;
        let mut due: Vec<_> = state
            .stores
            .iter()
            .flat_map(|(store, jobs)| {
                jobs.values().filter_map(move |job| {
                    let run_times = job.get_run_times(now);
                    (!run_times.is_empty()).then(|| (store.clone(), job.id().clone(), run_times))
                })
            })
            .collect();
        due.sort_by(|a, b| (a.2[0], &a.0, &a.1).cmp(&(b.2[0], &b.0, &b.1)));
        Ok(due)
    }

    /// Remove a job, scheduled or pending.
    pub fn remove_job(&self, id: &JobId, store: &StoreId) -> Result<(), SchedulerError> {
        let mut state = self.write()?;
        let removed = state
            .stores
            .get_mut(store)
            .and_then(|jobs| jobs.remove(id))
            .is_some();
        if !removed {
            let index = state
                .pending
                .iter()
                .position(|(s, job)| s == store && job.id() == id)
                .ok_or_else(|| not_found(id, store))?;
            state.pending.remove(index);
        }

        tracing::info!(job_id = %id, store = %store, "Removed job");
        Ok(())
    }

    /// Apply `changes` to a job.
    ///
    /// A new id must be free in the store. Replacing the trigger of a
    /// scheduled job recomputes its `next_run_time` from the current time
    /// unless the changes set one explicitly.
    pub fn modify_job(
        &self,
        id: &JobId,
        store: &StoreId,
        changes: JobChanges<T>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.write()?;
        if let Some(new_id) = changes.new_id()
            && new_id != id
            && state.contains(new_id, store)
        {
            return Err(SchedulerError::ConflictingId(new_id.clone()));
        }
        let reschedule =
            state.running && changes.replaces_trigger() && !changes.sets_next_run_time();

        let new_id = {
            let job = state.job_mut(id, store).ok_or_else(|| not_found(id, store))?;
            job.modify(changes, self.resolver.as_ref())?;
            if reschedule {
                job.compute_next_run_time(Utc::now());
            }
            job.id().clone()
        };

        if &new_id != id
            && let Some(jobs) = state.stores.get_mut(store)
            && let Some(job) = jobs.remove(id)
        {
            jobs.insert(new_id.clone(), job);
        }

        tracing::info!(job_id = %id, new_id = %new_id, store = %store, "Modified job");
        Ok(())
    }

    /// Views of the jobs in `store`, pending ones or scheduled ones.
    ///
    /// Scheduled jobs come ordered by `next_run_time` with retired jobs last.
    pub fn jobs(&self, store: &StoreId, pending: bool) -> Result<Vec<JobView<T>>, SchedulerError> {
        let state = self.read()?;
        let jobs = state
            .stores
            .get(store)
            .ok_or_else(|| SchedulerError::StoreNotFound(store.clone()))?;

        if pending {
            return Ok(state
                .pending
                .iter()
                .filter(|(s, _)| s == store)
                .map(|(_, job)| job.view())
                .collect());
        }

        let mut views: Vec<_> = jobs.values().map(Job::view).collect();
        views.sort_by(|a, b| {
            (a.next_run_time.is_none(), a.next_run_time, &a.id).cmp(&(
                b.next_run_time.is_none(),
                b.next_run_time,
                &b.id,
            ))
        });
        Ok(views)
    }
}

#[async_trait]
impl<T: Trigger + Clone + 'static> Scheduler<T> for JobRegistry<T> {
    async fn unschedule_job(&self, id: &JobId, store: &StoreId) -> Result<(), SchedulerError> {
        self.remove_job(id, store)
    }

    async fn modify_job(
        &self,
        id: &JobId,
        store: &StoreId,
        changes: JobChanges<T>,
    ) -> Result<(), SchedulerError> {
        JobRegistry::modify_job(self, id, store, changes)
    }

    async fn get_job(&self, id: &JobId, store: &StoreId) -> Result<JobView<T>, SchedulerError> {
        self.view_of(id, store)
    }

    async fn get_jobs(
        &self,
        store: &StoreId,
        pending: bool,
    ) -> Result<Vec<JobView<T>>, SchedulerError> {
        self.jobs(store, pending)
    }
}
