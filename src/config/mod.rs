//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for jobs and global defaults.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{
    ConfiguredJob, GLOBAL_CONFIG_FILE, JobConfigBuilder, load_global_config,
    load_jobs_from_directory,
};
pub use error::ConfigError;
pub use types::{GlobalConfig, GraceTimeConfig, JobConfig, ScheduleConfig, UNBOUNDED};
pub use yaml::YamlLoader;
