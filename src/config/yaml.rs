//! YAML configuration parsing.
//!
//! Parses job definitions and global configuration from YAML files.

use std::path::Path;

use super::error::ConfigError;
use super::types::{GlobalConfig, JobConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_global_config(&content)
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    /// Load a job configuration from a file.
    pub fn load_job_config(path: impl AsRef<Path>) -> Result<JobConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: JobConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_job_config(&config).map_err(|e| ConfigError::JobFileError {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        Ok(config)
    }

    /// Parse a job configuration from a YAML string.
    pub fn parse_job_config(yaml: &str) -> Result<JobConfig, ConfigError> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        Self::validate_job_config(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        if config.max_instances == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_instances cannot be zero".into(),
            ));
        }
        if let Some(grace) = &config.misfire_grace_time {
            grace.to_duration()?;
        }
        Ok(())
    }

    /// Validate a job configuration.
    fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
        // An explicit id or name must not be blank
        if config.id.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.name.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::MissingField("name".into()));
        }

        if config.func.is_null() {
            return Err(ConfigError::MissingField("func".into()));
        }

        if config.schedule.cron().trim().is_empty() {
            return Err(ConfigError::MissingField("schedule".into()));
        }

        // Zero would make the job un-runnable
        if config.max_instances == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_instances cannot be zero".into(),
            ));
        }

        if let Some(grace) = &config.misfire_grace_time {
            grace.to_duration()?;
        }

        if config.store.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::InvalidConfig("store cannot be empty".into()));
        }

        Ok(())
    }
}
