//! Configuration type definitions.
//!
//! This module contains the type definitions for YAML configuration structures:
//! global defaults and one job definition per file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::job::JobDefaults;

use super::error::ConfigError;

/// Keyword accepted in place of a number of seconds for an unbounded grace time.
pub const UNBOUNDED: &str = "unbounded";

/// Global configuration (recur.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default timezone for schedules that don't name one.
    pub default_timezone: Option<String>,
    /// Default misfire grace time.
    pub misfire_grace_time: Option<GraceTimeConfig>,
    /// Default coalesce policy.
    pub coalesce: Option<bool>,
    /// Default cap on total executions.
    pub max_runs: Option<u32>,
    /// Default cap on concurrent executions.
    pub max_instances: Option<usize>,
}

impl GlobalConfig {
    /// Policy defaults for jobs, falling back to [`JobDefaults::default`].
    pub fn job_defaults(&self) -> Result<JobDefaults, ConfigError> {
        let mut defaults = JobDefaults::default();
        if let Some(grace) = &self.misfire_grace_time {
            defaults.misfire_grace_time = grace.to_duration()?;
        }
        if let Some(coalesce) = self.coalesce {
            defaults.coalesce = coalesce;
        }
        if let Some(max_runs) = self.max_runs {
            defaults.max_runs = Some(max_runs);
        }
        if let Some(max_instances) = self.max_instances {
            defaults.max_instances = max_instances;
        }
        Ok(defaults)
    }
}

/// Job configuration from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job identifier; generated when absent.
    pub id: Option<String>,
    /// Human-readable name; derived from the callable when absent.
    pub name: Option<String>,
    /// Textual callable reference (`module:name`).
    #[serde(default)]
    pub func: serde_yaml::Value,
    /// Schedule expression (cron, shortcut, interval or one-shot).
    pub schedule: ScheduleConfig,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<serde_yaml::Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, serde_yaml::Value>,
    /// Grace period for late executions.
    pub misfire_grace_time: Option<GraceTimeConfig>,
    /// Collapse missed fire times into one execution.
    pub coalesce: Option<bool>,
    /// Cap on total executions.
    pub max_runs: Option<u32>,
    /// Cap on concurrent executions.
    pub max_instances: Option<usize>,
    /// Store alias the job belongs to.
    pub store: Option<String>,
}

/// Schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    /// Simple expression string.
    Simple(String),
    /// Detailed schedule with timezone.
    Detailed {
        /// Expression (cron, shortcut, interval or one-shot).
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
        /// Anchor for interval schedules.
        start: Option<DateTime<Utc>>,
    },
}

impl ScheduleConfig {
    /// Get the expression.
    pub fn cron(&self) -> &str {
        match self {
            ScheduleConfig::Simple(s) => s,
            ScheduleConfig::Detailed { cron, .. } => cron,
        }
    }

    /// Get the timezone, if specified.
    pub fn timezone(&self) -> Option<&str> {
        match self {
            ScheduleConfig::Simple(_) => None,
            ScheduleConfig::Detailed { timezone, .. } => timezone.as_deref(),
        }
    }

    /// Get the interval anchor, if specified.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        match self {
            ScheduleConfig::Simple(_) => None,
            ScheduleConfig::Detailed { start, .. } => *start,
        }
    }
}

/// Misfire grace time: whole seconds, or `unbounded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraceTimeConfig {
    /// Number of seconds.
    Seconds(u64),
    /// A keyword; only `unbounded` is accepted.
    Keyword(String),
}

impl GraceTimeConfig {
    /// Convert to a duration (`None` = unbounded).
    pub fn to_duration(&self) -> Result<Option<Duration>, ConfigError> {
        match self {
            GraceTimeConfig::Seconds(secs) => Ok(Some(Duration::from_secs(*secs))),
            GraceTimeConfig::Keyword(word) if word == UNBOUNDED => Ok(None),
            GraceTimeConfig::Keyword(word) => Err(ConfigError::InvalidConfig(format!(
                "misfire_grace_time must be a number of seconds or '{}' (got '{}')",
                UNBOUNDED, word
            ))),
        }
    }
}
