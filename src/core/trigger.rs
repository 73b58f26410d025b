//! The trigger contract consumed by jobs.
//!
//! A trigger is an opaque time rule. Jobs only ever ask it for the next fire
//! instant strictly after a given instant and never look at its internals.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Produces fire times for a job.
///
/// Implementations must be pure functions of their input and effectively
/// monotonic: feeding strictly increasing instants must never yield a
/// non-increasing sequence of results. Run-time enumeration relies on this to
/// terminate.
pub trait Trigger: fmt::Debug + Send + Sync {
    /// Next fire instant strictly after `after`, or `None` once exhausted.
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

impl<T: Trigger + ?Sized> Trigger for Arc<T> {
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (**self).next_fire_time(after)
    }
}

impl<T: Trigger + ?Sized> Trigger for Box<T> {
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (**self).next_fire_time(after)
    }
}
