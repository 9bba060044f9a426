use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertBuddyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("Download reference error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Missing S3 settings: {0}")]
    MissingS3Settings(String),

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Failed to prepare storage directory '{path}': {source}")]
    StorageDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid S3 endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Rejections raised before a job is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported target '{target}'. Supported: {supported}")]
    UnsupportedTarget { target: String, supported: String },

    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Target {target} expects {expected} input file(s), got {actual}")]
    InputCount {
        target: String,
        expected: String,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid job id '{0}'")]
    InvalidJobId(String),

    #[error("Invalid object name '{name}': {reason}")]
    InvalidObjectName { name: String, reason: String },

    #[error("Batch of {0} files exceeds the {max} file limit", max = crate::storage::MAX_BATCH_LEN)]
    BatchTooLarge(usize),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object already exists: {0}")]
    ObjectExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store request failed for '{key}': {message}")]
    Request { key: String, message: String },

    #[error("Object store returned HTTP {status} for '{key}': {body}")]
    Status {
        key: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse object listing: {0}")]
    Listing(String),

    #[error("Failed to sign object store request: {0}")]
    Signing(String),
}

/// Failures of a single external conversion command.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Display is the tool's diagnostic text verbatim.
    #[error("{message}")]
    ToolFailed {
        program: String,
        status: Option<i32>,
        message: String,
    },

    #[error("No artifact produced by {program}")]
    NoArtifact { program: String },

    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("No output files produced")]
    NoOutputs,

    #[error("Output '{0}' has no usable file name")]
    InvalidEntry(PathBuf),

    #[error("Failed to create archive in '{path}': {source}")]
    CreateArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to add '{path}' to archive: {message}")]
    WriteEntry { path: PathBuf, message: String },

    #[error("Failed to finalize archive '{path}': {message}")]
    Finalize { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Deliverable '{0}' does not exist")]
    MissingObject(String),

    #[error("Download expiry of {0}s exceeds the 604800s maximum")]
    ExpiryTooLong(u64),

    #[error("Failed to sign download URL: {0}")]
    Signing(String),

    #[error("Invalid download reference '{0}'")]
    InvalidReference(String),

    #[error("Failed to look up deliverable: {0}")]
    Lookup(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Job already exists: {0}")]
    AlreadyExists(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker queue is full ({0} jobs waiting)")]
    QueueFull(usize),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, ConvertBuddyError>;
