pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod package;
pub mod retention;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use config::{load_config, load_runtime_config, BackendKind, Config};
pub use convert::{ConversionOptions, ConversionTarget, Converter};
pub use error::{
    ConfigError, ConversionError, ConvertBuddyError, JobError, PackageError, ReferenceError,
    Result, StorageError, ValidationError, WorkerError,
};
pub use job::{
    Coordinator, JobEvent, JobEventBroadcaster, JobId, JobOutcome, JobState, JobStatusView,
    JobStore,
};
pub use package::package_outputs;
pub use retention::{Reaper, RetentionScheduler, SweepReport};
pub use secrets::{resolve_secret, SecretSource};
pub use storage::{build_backend, DownloadReference, LocalBackend, S3Backend, StorageBackend, Upload};
pub use worker::{ExecutionFacility, WorkerPool};
