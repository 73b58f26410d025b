//! recur - inspect recurring job definitions.
//!
//! Usage:
//!   recur validate <jobs-dir>   Validate job configurations
//!   recur list <jobs-dir>       List jobs with their next run time
//!   recur preview <jobs-dir>    Show the fire times falling inside a window

use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use recur::{
    CallableRegistry, ConfiguredJob, JobRegistry, ReferenceError, Schedule, datetime_repr,
    load_global_config, load_jobs_from_directory,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// recur - inspect recurring job definitions
#[derive(Parser)]
#[command(name = "recur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate job configurations
    Validate {
        /// Path to the directory containing job YAML files
        #[arg(value_name = "JOBS_DIR")]
        jobs_dir: PathBuf,
    },

    /// List all jobs in the directory with their next run time
    List {
        /// Path to the directory containing job YAML files
        #[arg(value_name = "JOBS_DIR")]
        jobs_dir: PathBuf,
    },

    /// Show the fire times each job would have inside a time window
    Preview {
        /// Path to the directory containing job YAML files
        #[arg(value_name = "JOBS_DIR")]
        jobs_dir: PathBuf,

        /// Start of the window, RFC 3339 (default: now)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// End of the window, RFC 3339 (default: one day after the start)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Only preview this job
        #[arg(long = "job", value_name = "JOB_ID")]
        job_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { jobs_dir } => {
            validate_jobs(jobs_dir)?;
        }
        Commands::List { jobs_dir } => {
            list_jobs(jobs_dir).await?;
        }
        Commands::Preview {
            jobs_dir,
            from,
            until,
            job_id,
        } => {
            let from = from.unwrap_or_else(Utc::now);
            let until = until.unwrap_or(from + TimeDelta::days(1));
            preview_jobs(jobs_dir, from, until, job_id)?;
        }
    }

    Ok(())
}

/// Callables job files may reference from the command line.
fn builtin_callables() -> Result<CallableRegistry, ReferenceError> {
    CallableRegistry::new()
        .with("builtin:noop", |_: &[Value], _: &Map<String, Value>| {
            Ok(Value::Null)
        })?
        .with("builtin:echo", |args: &[Value], kwargs: &Map<String, Value>| {
            let mut echoed = Map::new();
            echoed.insert("args".into(), Value::from(args.to_vec()));
            echoed.insert("kwargs".into(), Value::Object(kwargs.clone()));
            Ok(Value::Object(echoed))
        })
}

fn load_jobs(jobs_dir: &Path) -> Result<Vec<ConfiguredJob>, Box<dyn std::error::Error>> {
    let callables = builtin_callables()?;
    let global = load_global_config(jobs_dir)?;
    Ok(load_jobs_from_directory(jobs_dir, &callables, &global)?)
}

/// Validate job configurations.
fn validate_jobs(jobs_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating jobs in: {}", jobs_dir.display());

    match load_jobs(&jobs_dir) {
        Ok(jobs) => {
            info!("All {} job(s) are valid:", jobs.len());
            for ConfiguredJob { store, job } in &jobs {
                info!("  - {} ({}) in store '{}': OK", job.id(), job.name(), store);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

/// List all jobs in the directory.
async fn list_jobs(jobs_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = load_jobs(&jobs_dir)?;

    if jobs.is_empty() {
        println!("No jobs found in {}", jobs_dir.display());
        return Ok(());
    }

    let registry: Arc<JobRegistry<Schedule>> = Arc::new(JobRegistry::new(Arc::new(
        builtin_callables()?,
    )));
    let mut handles = Vec::with_capacity(jobs.len());
    for ConfiguredJob { store, job } in jobs {
        handles.push(registry.add_job(job, store)?);
    }
    registry.start(Utc::now())?;

    println!("Jobs in {}:", jobs_dir.display());
    println!();

    for handle in &mut handles {
        handle.refresh().await?;

        println!("ID: {}", handle.id());
        println!("  Name: {}", handle.name());
        println!("  Store: {}", handle.store());
        println!("  Func: {}", handle.func_ref().unwrap_or("<in-memory>"));
        println!("  Schedule: {}", handle.trigger());
        println!("  Next run: {}", datetime_repr(handle.next_run_time()));
        match handle.misfire_grace_time() {
            Some(grace) => println!("  Misfire grace: {}s", grace.as_secs()),
            None => println!("  Misfire grace: unbounded"),
        }
        println!("  Coalesce: {}", handle.coalesce());
        if let Some(max) = handle.max_runs() {
            println!("  Max runs: {}", max);
        }
        println!("  Max instances: {}", handle.max_instances());
        println!();
    }

    Ok(())
}

/// Show the fire times falling in `(from, until]` for each job.
fn preview_jobs(
    jobs_dir: PathBuf,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    job_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if until <= from {
        return Err(format!("--until ({}) must be after --from ({})", until, from).into());
    }

    let jobs = load_jobs(&jobs_dir)?;
    let mut selected: Vec<_> = jobs
        .into_iter()
        .filter(|c| job_id.as_deref().is_none_or(|id| c.job.id().as_str() == id))
        .collect();

    if selected.is_empty() {
        warn!("No matching jobs found in {}", jobs_dir.display());
        return Ok(());
    }

    println!(
        "Fire times from {} until {}:",
        datetime_repr(Some(from)),
        datetime_repr(Some(until))
    );
    println!();

    for ConfiguredJob { job, .. } in &mut selected {
        job.compute_next_run_time(from);
        let run_times = job.get_run_times(until);

        println!("{} [{}]", job, job.id());
        if run_times.is_empty() {
            println!("  (no fire times)");
        }
        for run_time in &run_times {
            println!("  - {}", datetime_repr(Some(*run_time)));
        }
        if job.coalesce() && run_times.len() > 1 {
            println!(
                "  {} missed fire times would coalesce into one run",
                run_times.len()
            );
        }
        println!();
    }

    Ok(())
}
