//! Scheduler-facing side of jobs.
//!
//! This module provides the interface handles use to reach the scheduler
//! owning their job, the handle itself, and an in-memory registry that
//! implements the interface.

mod handle;
mod registry;
mod types;

pub use handle::JobHandle;
pub use registry::JobRegistry;
pub use types::{Scheduler, SchedulerError};
