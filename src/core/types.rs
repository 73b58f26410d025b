//! Core identifier types.
//!
//! Jobs are keyed by [`JobId`] and live in a named job store ([`StoreId`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Alias of the store every job lands in unless told otherwise.
pub const DEFAULT_STORE: &str = "default";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Alias of the job store a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl JobId {
    /// Create a new JobId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier (32 lowercase hex digits).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl StoreId {
    /// Create a new StoreId from a string.
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new(DEFAULT_STORE)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StoreId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
