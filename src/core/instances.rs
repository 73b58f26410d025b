//! Per-job admission control.
//!
//! [`InstanceGate`] bounds how many executions of one job may be in flight at
//! once. It is the only piece of job state written from several execution
//! contexts, so every check-and-update happens under its own lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Admission was denied because the job is already at its concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("maximum number of running instances reached ({max_instances})")]
pub struct MaxInstancesReached {
    /// The limit in force when admission was denied.
    pub max_instances: usize,
}

#[derive(Debug)]
struct GateState {
    instances: usize,
    max_instances: usize,
}

/// Bounded counter of in-flight executions.
///
/// Invariant: `0 <= instances <= max_instances`.
#[derive(Debug)]
pub struct InstanceGate {
    state: Mutex<GateState>,
}

impl InstanceGate {
    /// Create a gate with no executions in flight.
    pub fn new(max_instances: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                instances: 0,
                max_instances,
            }),
        }
    }

    // Every update is a single assignment under the lock, so a poisoned
    // state is still consistent.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one more execution, returning the new in-flight count.
    pub fn add_instance(&self) -> Result<usize, MaxInstancesReached> {
        let mut state = self.lock();
        if state.instances >= state.max_instances {
            return Err(MaxInstancesReached {
                max_instances: state.max_instances,
            });
        }
        state.instances += 1;
        Ok(state.instances)
    }

    /// Release one execution, returning the new in-flight count.
    ///
    /// # Panics
    ///
    /// Panics if no execution is in flight. Releasing more than was admitted
    /// is a bug in the caller.
    pub fn remove_instance(&self) -> usize {
        let mut state = self.lock();
        assert!(state.instances > 0, "already at 0 instances");
        state.instances -= 1;
        state.instances
    }

    /// Admit one execution and release it when the returned permit drops.
    pub fn acquire(self: &Arc<Self>) -> Result<InstancePermit, MaxInstancesReached> {
        self.add_instance()?;
        Ok(InstancePermit {
            gate: Arc::clone(self),
        })
    }

    /// Current number of in-flight executions.
    pub fn instances(&self) -> usize {
        self.lock().instances
    }

    /// Current concurrency limit.
    pub fn max_instances(&self) -> usize {
        self.lock().max_instances
    }

    /// Change the limit. Fails, leaving the limit untouched, if more executions
    /// than `max_instances` are already in flight.
    pub(crate) fn set_max_instances(&self, max_instances: usize) -> Result<(), usize> {
        let mut state = self.lock();
        if state.instances > max_instances {
            return Err(state.instances);
        }
        state.max_instances = max_instances;
        Ok(())
    }
}

/// An admitted execution. Dropping it releases the slot.
#[derive(Debug)]
pub struct InstancePermit {
    gate: Arc<InstanceGate>,
}

impl Drop for InstancePermit {
    fn drop(&mut self) {
        self.gate.remove_instance();
    }
}
