//! Test harness for isolated job execution.
//!
//! The `TestHarness` struct wires a coordinator to a temporary local storage
//! root and fake converters, and runs submitted jobs synchronously through
//! [`InlineFacility`] so assertions never race a worker thread.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tempfile::TempDir;

use convertbuddy::config::{Config, ToolsConfig};
use convertbuddy::error::WorkerError;
use convertbuddy::job::{ConversionTask, JobId, JobStatusView, NoopProgress};
use convertbuddy::{Coordinator, ExecutionFacility, JobStore, LocalBackend, Upload};

use super::tools::working_tools;

/// Facility that only records tasks; the test decides when they run.
#[derive(Default)]
pub struct InlineFacility {
    tasks: Mutex<Vec<ConversionTask>>,
}

impl InlineFacility {
    pub fn take(&self) -> Vec<ConversionTask> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

impl ExecutionFacility for InlineFacility {
    fn submit(&self, task: ConversionTask) -> Result<(), WorkerError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the local storage backend.
    pub storage_dir: PathBuf,
    pub config: Config,
    pub backend: Arc<LocalBackend>,
    pub store: Arc<JobStore>,
    pub coordinator: Arc<Coordinator>,
    pub facility: InlineFacility,
}

impl TestHarness {
    /// Harness whose converters all succeed.
    pub fn new() -> Self {
        Self::with_tools(working_tools)
    }

    /// Harness using the converters built by `tools` inside a scratch
    /// `tools/` directory.
    pub fn with_tools<F>(tools: F) -> Self
    where
        F: FnOnce(&Path) -> ToolsConfig,
    {
        Self::with_store(tools, JobStore::new())
    }

    pub fn with_store<F>(tools: F, store: JobStore) -> Self
    where
        F: FnOnce(&Path) -> ToolsConfig,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("storage");

        let mut config = Config::default();
        config.storage.directory = storage_dir.clone();
        config.tools = tools(&temp_dir.path().join("tools"));

        let backend = Arc::new(
            LocalBackend::new(&storage_dir, &config.download.files_prefix)
                .expect("Failed to create local backend"),
        );
        let store = Arc::new(store);
        let coordinator = Arc::new(Coordinator::new(
            &config,
            backend.clone(),
            Arc::clone(&store),
        ));

        Self {
            temp_dir,
            storage_dir: backend.base_directory().to_path_buf(),
            config,
            backend,
            store,
            coordinator,
            facility: InlineFacility::default(),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn namespace_dir(&self, job_id: &JobId) -> PathBuf {
        self.storage_dir.join(job_id.to_string())
    }

    /// Submits a job without running it.
    pub fn submit(
        &self,
        target: &str,
        files: &[(&str, &str)],
        options: Value,
    ) -> convertbuddy::Result<JobId> {
        let uploads = files
            .iter()
            .map(|(name, content)| Upload::from_bytes(*name, content.as_bytes().to_vec()))
            .collect();
        let options = match options {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.coordinator
            .submit(&self.facility, target, uploads, options)
    }

    /// Runs every task handed to the facility so far.
    pub fn run_pending(&self) {
        for task in self.facility.take() {
            let _ = self.coordinator.execute(&task, &NoopProgress);
        }
    }

    /// Submits and runs one job, returning its final status.
    pub fn run_job(&self, target: &str, files: &[(&str, &str)], options: Value) -> (JobId, JobStatusView) {
        let job_id = self
            .submit(target, files, options)
            .expect("submission should succeed");
        self.run_pending();
        let view = self
            .coordinator
            .query_status(&job_id.to_string())
            .expect("job should exist");
        (job_id, view)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
