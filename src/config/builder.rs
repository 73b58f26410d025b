//! Job builder from YAML configuration.
//!
//! This module converts JobConfig into jobs bound to a [`Schedule`].

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::callable::CallableResolver;
use crate::core::job::{Job, JobFunc};
use crate::core::schedule::Schedule;
use crate::core::types::StoreId;

use super::error::ConfigError;
use super::types::{GlobalConfig, JobConfig};
use super::yaml::YamlLoader;

/// Name of the global configuration file inside a jobs directory.
pub const GLOBAL_CONFIG_FILE: &str = "recur.yaml";

/// A job built from configuration, with the store it should be added to.
#[derive(Debug)]
pub struct ConfiguredJob {
    pub store: StoreId,
    pub job: Job<Schedule>,
}

/// Builder for creating Jobs from YAML configuration.
pub struct JobConfigBuilder;

impl JobConfigBuilder {
    /// Build a Job from a JobConfig.
    ///
    /// Fields the config leaves out come from `defaults`; the callable
    /// reference is resolved through `resolver`.
    pub fn build(
        config: JobConfig,
        resolver: &dyn CallableResolver,
        defaults: &GlobalConfig,
    ) -> Result<ConfiguredJob, ConfigError> {
        let timezone = config
            .schedule
            .timezone()
            .or(defaults.default_timezone.as_deref())
            .unwrap_or("UTC");
        let mut schedule = Schedule::with_timezone(config.schedule.cron(), timezone)?;
        if let Some(start) = config.schedule.start() {
            schedule = schedule.starting_at(start);
        }

        // Anything but a string reference is rejected here
        let func = JobFunc::try_from(to_json(&config.func)?)?;

        let mut builder = Job::builder(schedule, func).defaults(&defaults.job_defaults()?);
        if let Some(id) = config.id {
            builder = builder.id(id);
        }
        if let Some(name) = config.name {
            builder = builder.name(name);
        }

        let args = config
            .args
            .iter()
            .map(to_json)
            .collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = Map::new();
        for (key, value) in &config.kwargs {
            kwargs.insert(key.clone(), to_json(value)?);
        }
        builder = builder.args(args).kwargs(kwargs);

        if let Some(grace) = &config.misfire_grace_time {
            builder = builder.misfire_grace_time(grace.to_duration()?);
        }
        if let Some(coalesce) = config.coalesce {
            builder = builder.coalesce(coalesce);
        }
        if let Some(max_runs) = config.max_runs {
            builder = builder.max_runs(max_runs);
        }
        if let Some(max_instances) = config.max_instances {
            builder = builder.max_instances(max_instances);
        }

        let job = builder.build(resolver)?;
        let store = config.store.map(StoreId::new).unwrap_or_default();

        Ok(ConfiguredJob { store, job })
    }
}

fn to_json(value: &serde_yaml::Value) -> Result<Value, ConfigError> {
    serde_json::to_value(value).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
}

/// Load the global configuration of a jobs directory, or defaults when it has none.
pub fn load_global_config(dir: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
    let path = dir.as_ref().join(GLOBAL_CONFIG_FILE);
    if path.is_file() {
        YamlLoader::load_global_config(&path)
    } else {
        Ok(GlobalConfig::default())
    }
}

/// Load all job configurations from a directory.
///
/// Files are read in name order. Ids must be unique within each store.
pub fn load_jobs_from_directory(
    dir: impl AsRef<Path>,
    resolver: &dyn CallableResolver,
    defaults: &GlobalConfig,
) -> Result<Vec<ConfiguredJob>, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let dir_error = |source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();

        // Only process .yaml and .yml files
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
            && path.file_name().is_some_and(|name| name != GLOBAL_CONFIG_FILE)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        let config = YamlLoader::load_job_config(&path)?;
        let configured =
            JobConfigBuilder::build(config, resolver, defaults).map_err(|e| {
                ConfigError::JobFileError {
                    path: path.clone(),
                    source: Box::new(e),
                }
            })?;

        if !seen.insert((configured.store.clone(), configured.job.id().clone())) {
            return Err(ConfigError::InvalidConfig(format!(
                "duplicate job id '{}' in store '{}' ({})",
                configured.job.id(),
                configured.store,
                path.display()
            )));
        }

        tracing::debug!(
            job_id = %configured.job.id(),
            store = %configured.store,
            path = %path.display(),
            "Loaded job definition"
        );
        jobs.push(configured);
    }

    tracing::info!(jobs = jobs.len(), dir = %dir.display(), "Loaded job definitions");
    Ok(jobs)
}
