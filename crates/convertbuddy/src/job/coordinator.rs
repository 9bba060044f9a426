//! Drives each job from submission to a terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, info_span, warn};

use super::model::{ConversionTask, JobId, JobRecord, JobStatusView};
use super::progress::{checkpoint, ProgressReporter};
use super::store::JobStore;
use super::workspace::Workspace;
use crate::config::Config;
use crate::convert::{ConversionOptions, ConversionTarget, Converter};
use crate::error::{ConvertBuddyError, JobError, Result, StorageError};
use crate::package::package_outputs;
use crate::storage::{input_name, DownloadReference, StorageBackend, Upload};
use crate::worker::ExecutionFacility;

pub struct Coordinator {
    backend: Arc<dyn StorageBackend>,
    store: Arc<JobStore>,
    converter: Converter,
    scratch_directory: Option<PathBuf>,
}

impl Coordinator {
    pub fn new(config: &Config, backend: Arc<dyn StorageBackend>, store: Arc<JobStore>) -> Self {
        Self {
            backend,
            store,
            converter: Converter::new(config.tools.clone()),
            scratch_directory: config.scratch_directory.clone(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Validates the request, stores the inputs and hands the job to
    /// `facility`. Returns as soon as the job is `queued`.
    ///
    /// Validation failures create no job. If the facility refuses the task
    /// the job is failed immediately so it never lingers in `queued`.
    pub fn submit(
        &self,
        facility: &dyn ExecutionFacility,
        target: &str,
        uploads: Vec<Upload>,
        options: Map<String, Value>,
    ) -> Result<JobId> {
        let conversion: ConversionTarget = target.parse()?;
        ConversionOptions::from_map(conversion, &options)?;
        conversion.check_input_count(uploads.len())?;

        let job_id = JobId::new();
        let _span = info_span!("submit", job_id = %job_id, conversion = %conversion).entered();

        self.backend.create_namespace(&job_id)?;
        let inputs = self.store_inputs(&job_id, uploads)?;
        self.store
            .insert(JobRecord::new(job_id, conversion.as_str(), inputs.clone()))?;
        info!("Job queued with {} input(s)", inputs.len());

        let task = ConversionTask {
            job_id,
            target: conversion.as_str().to_string(),
            inputs,
            options,
        };

        if let Err(e) = facility.submit(task) {
            warn!("Could not schedule job: {}", e);
            self.store.start(&job_id)?;
            self.store
                .fail(&job_id, &format!("Could not schedule job: {}", e))?;
            return Err(e.into());
        }

        Ok(job_id)
    }

    fn store_inputs(&self, job_id: &JobId, mut uploads: Vec<Upload>) -> Result<Vec<String>> {
        let stored = if uploads.len() == 1 {
            let mut upload = uploads.remove(0);
            let name = input_name(&upload.filename);
            vec![self.backend.put(job_id, &name, &mut upload.data)?]
        } else {
            self.backend.put_batch(job_id, uploads)?
        };
        Ok(stored.into_iter().map(|object| object.name).collect())
    }

    /// Latest known state of `job_id`. Never changes anything.
    pub fn query_status(&self, job_id: &str) -> Result<JobStatusView> {
        let id: JobId = job_id
            .parse()
            .map_err(|_| JobError::NotFound(job_id.to_string()))?;
        Ok(self.store.view(&id)?)
    }

    /// Runs one job to a terminal state. Step failures are recorded on the
    /// job and are not returned; `Err` means the job could not be started
    /// (unknown id, or not `queued`).
    pub fn execute(
        &self,
        task: &ConversionTask,
        progress: &dyn ProgressReporter,
    ) -> std::result::Result<JobStatusView, JobError> {
        let job_id = task.job_id;
        let _span = info_span!("job", job_id = %job_id, conversion = %task.target).entered();

        self.store.start(&job_id)?;
        progress.report(checkpoint::STARTED, "Conversion started");

        match self.run_steps(task, progress) {
            Ok(reference) => {
                info!("Job finished");
                self.store
                    .complete(&job_id, reference.url, reference.expires_at)?;
                progress.report(checkpoint::DONE, "Conversion finished");
            }
            Err(e) => {
                let message = failure_message(&e);
                warn!("Job failed: {}", message);
                self.store.fail(&job_id, &message)?;
            }
        }

        self.store.view(&job_id)
    }

    fn checkpoint(&self, job_id: &JobId, progress: &dyn ProgressReporter, value: u8, message: &str) {
        if let Err(e) = self.store.set_progress(job_id, value) {
            debug!("Progress update dropped: {}", e);
        }
        progress.report(value, message);
    }

    fn run_steps(
        &self,
        task: &ConversionTask,
        progress: &dyn ProgressReporter,
    ) -> Result<DownloadReference> {
        let job_id = &task.job_id;

        let target: ConversionTarget = task.target.parse()?;
        let options = ConversionOptions::from_map(target, &task.options)?;

        let (workspace, inputs) = {
            let _step = info_span!("prepare_workspace").entered();
            let workspace = Workspace::prepare(
                self.backend.as_ref(),
                job_id,
                self.scratch_directory.as_deref(),
            )?;
            let inputs = workspace.stage_inputs(self.backend.as_ref(), job_id, &task.inputs)?;
            (workspace, inputs)
        };

        let output = {
            let _step = info_span!("convert").entered();
            self.converter
                .run(target, &options, &inputs, workspace.path())?
        };
        self.checkpoint(job_id, progress, checkpoint::CONVERTED, "Conversion complete");

        let deliverable = {
            let _step = info_span!("package", outputs = output.files.len()).entered();
            package_outputs(workspace.path(), &output.files, output.archive_stem)?
        };
        self.checkpoint(job_id, progress, checkpoint::PACKAGED, "Packaging complete");

        let _step = info_span!("publish").entered();
        let name = deliverable_name(&deliverable)?;
        let object = self.backend.put_file(job_id, &name, &deliverable)?;
        let reference = self.backend.download_reference(&object, &name)?;
        debug!(
            "Deliverable {} ready at {}",
            name,
            crate::sanitize::redact_url(&reference.url)
        );

        // Scratch (if any) goes away here, after the upload
        drop(workspace);
        Ok(reference)
    }
}

fn deliverable_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ConvertBuddyError::Storage(StorageError::InvalidObjectName {
                name: path.display().to_string(),
                reason: "deliverable has no usable file name".to_string(),
            })
        })
}

/// The text recorded on a failed job: the failing step's own message, so
/// a tool's stderr reaches the user verbatim.
pub fn failure_message(error: &ConvertBuddyError) -> String {
    match error {
        ConvertBuddyError::Config(e) => e.to_string(),
        ConvertBuddyError::Validation(e) => e.to_string(),
        ConvertBuddyError::Storage(e) => e.to_string(),
        ConvertBuddyError::Conversion(e) => e.to_string(),
        ConvertBuddyError::Package(e) => e.to_string(),
        ConvertBuddyError::Reference(e) => e.to_string(),
        ConvertBuddyError::Job(e) => e.to_string(),
        ConvertBuddyError::Worker(e) => e.to_string(),
    }
}
