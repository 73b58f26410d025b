pub mod config;
pub mod core;
pub mod scheduler;
pub mod testing;

pub use config::{
    ConfigError, ConfiguredJob, GlobalConfig, JobConfig, JobConfigBuilder, YamlLoader,
    load_global_config, load_jobs_from_directory,
};
pub use core::callable::{
    CallError, Callable, CallableRegistry, CallableResolver, ReferenceError, validate_reference,
};
pub use core::instances::{InstanceGate, InstancePermit, MaxInstancesReached};
pub use core::job::{
    Job, JobBuilder, JobChanges, JobDefaults, JobError, JobFunc, JobView, datetime_repr,
};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::snapshot::{JobSnapshot, SNAPSHOT_VERSION};
pub use core::trigger::Trigger;
pub use core::types::{DEFAULT_STORE, JobId, StoreId};
pub use scheduler::{JobHandle, JobRegistry, Scheduler, SchedulerError};
