//! Testing utilities for users of the recur library.
//!
//! This module provides helpers for testing code built on jobs:
//!
//! - [`FixedTrigger`]: fires at an explicit list of instants
//! - [`StepTrigger`]: fires every fixed step from an anchor, optionally a bounded number of times
//! - [`noop_callable`]: a callable that does nothing
//! - [`CallCounter`]: a callable that counts its invocations

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::callable::Callable;
use crate::core::trigger::Trigger;

/// A trigger that fires at a fixed set of instants.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use recur::Trigger;
/// use recur::testing::FixedTrigger;
///
/// let ten = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
/// let eleven = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
/// let trigger = FixedTrigger::new([eleven, ten]);
///
/// assert_eq!(trigger.next_fire_time(ten), Some(eleven));
/// assert_eq!(trigger.next_fire_time(eleven), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTrigger {
    times: Vec<DateTime<Utc>>,
}

impl FixedTrigger {
    /// Create a trigger firing at `times`, in any order.
    pub fn new(times: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let mut times: Vec<_> = times.into_iter().collect();
        times.sort();
        times.dedup();
        Self { times }
    }

    /// The fire times, oldest first.
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }
}

impl Trigger for FixedTrigger {
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.times.iter().copied().find(|time| *time > after)
    }
}

impl fmt::Display for FixedTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixed[{}]", self.times.len())
    }
}

/// A trigger that fires every `step` starting at `anchor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTrigger {
    anchor: DateTime<Utc>,
    step: TimeDelta,
    limit: Option<u32>,
}

impl StepTrigger {
    /// Fire at `anchor`, `anchor + step`, `anchor + 2 * step`, ...
    ///
    /// # Panics
    ///
    /// Panics if `step` is not positive.
    pub fn new(anchor: DateTime<Utc>, step: TimeDelta) -> Self {
        assert!(step > TimeDelta::zero(), "step must be positive");
        Self {
            anchor,
            step,
            limit: None,
        }
    }

    /// Stop after `limit` fire times.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn nth(&self, n: i64) -> Option<DateTime<Utc>> {
        if self.limit.is_some_and(|limit| n >= i64::from(limit)) {
            return None;
        }
        self.step
            .checked_mul(i32::try_from(n).ok()?)
            .and_then(|offset| self.anchor.checked_add_signed(offset))
    }
}

impl Trigger for StepTrigger {
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if after < self.anchor {
            return self.nth(0);
        }
        let elapsed = (after - self.anchor).num_microseconds()?;
        let step = self.step.num_microseconds()?;
        self.nth(elapsed / step + 1)
    }
}

impl fmt::Display for StepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {}s from {}", self.step.num_seconds(), self.anchor)
    }
}

/// A callable that ignores its arguments and returns `null`.
pub fn noop_callable() -> Callable {
    Callable::named("noop", |_: &[Value], _: &Map<String, Value>| Ok(Value::Null))
}

/// A callable that counts how many times it was invoked.
///
/// # Example
///
/// ```
/// use recur::testing::CallCounter;
/// use serde_json::Map;
///
/// let counter = CallCounter::new();
/// let callable = counter.callable();
/// callable.call(&[], &Map::new()).unwrap();
/// callable.call(&[], &Map::new()).unwrap();
///
/// assert_eq!(counter.count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callable bumping this counter.
    pub fn callable(&self) -> Callable {
        let calls = Arc::clone(&self.calls);
        Callable::named("counter", move |_: &[Value], _: &Map<String, Value>| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Value::from(n))
        })
    }

    /// Invocations so far.
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
