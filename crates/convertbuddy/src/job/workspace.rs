//! Where a job's external tools read inputs and write outputs.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::StorageError;
use crate::job::JobId;
use crate::storage::{Locator, StorageBackend};

/// The backend's own namespace directory when it has one, otherwise a
/// scratch directory that is removed when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    scratch: Option<TempDir>,
}

impl Workspace {
    pub fn prepare(
        backend: &dyn StorageBackend,
        job_id: &JobId,
        scratch_root: Option<&Path>,
    ) -> Result<Self, StorageError> {
        if let Some(dir) = backend.working_directory(job_id) {
            return Ok(Self { dir, scratch: None });
        }

        let builder_prefix = format!("convertbuddy-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&builder_prefix);

        let scratch = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| StorageError::CreateDirectory {
                    path: root.to_path_buf(),
                    source: e,
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| StorageError::CreateDirectory {
            path: scratch_root
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir),
            source: e,
        })?;

        Ok(Self {
            dir: scratch.path().to_path_buf(),
            scratch: Some(scratch),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Local paths of the stored inputs, in the given order. Scratch
    /// workspaces get a fetched copy of each object.
    pub fn stage_inputs(
        &self,
        backend: &dyn StorageBackend,
        job_id: &JobId,
        names: &[String],
    ) -> Result<Vec<PathBuf>, StorageError> {
        let mut staged = Vec::with_capacity(names.len());

        for name in names {
            let object = backend.object(job_id, name)?;
            match (&object.locator, self.is_scratch()) {
                (Locator::Path(path), false) => staged.push(path.clone()),
                _ => {
                    let dest = self.dir.join(name);
                    backend.fetch_to(&object, &dest)?;
                    staged.push(dest);
                }
            }
        }

        Ok(staged)
    }
}
