//! Core domain types: jobs, triggers, callables and their persisted form.

pub mod callable;
pub mod instances;
pub mod job;
pub mod schedule;
pub mod snapshot;
pub mod trigger;
pub mod types;
