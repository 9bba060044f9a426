use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{
    attachment_disposition, purge_expired, validate_object_name, DownloadReference, Locator,
    Namespace, ObjectRef, PurgeReport, StorageBackend,
};
use crate::config::BackendKind;
use crate::error::{ConfigError, ReferenceError, StorageError};
use crate::job::JobId;

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to [`copy_into_place`] + delete for
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    copy_into_place(src, dst)?;
    std::fs::remove_file(src).map_err(|e| StorageError::WriteFile {
        path: src.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Copies `src` to a temporary sibling of `dst` and persists it under the
/// final name only once complete. Never replaces an existing `dst`.
fn copy_into_place(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let write_error = |source: std::io::Error| StorageError::WriteFile {
        path: dst.to_path_buf(),
        source,
    };

    let mut source = File::open(src).map_err(|e| StorageError::ReadFile {
        path: src.to_path_buf(),
        source: e,
    })?;
    let mut staged = NamedTempFile::new_in(dir).map_err(write_error)?;
    std::io::copy(&mut source, &mut staged).map_err(write_error)?;

    staged.persist_noclobber(dst).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            StorageError::ObjectExists(dst.display().to_string())
        } else {
            write_error(e.error)
        }
    })?;
    Ok(())
}

/// Filesystem backend: one directory per job under `base`.
#[derive(Debug)]
pub struct LocalBackend {
    base: PathBuf,
    files_prefix: String,
}

impl LocalBackend {
    /// Creates the root directory if needed and canonicalizes it.
    pub fn new<P: AsRef<Path>>(base: P, files_prefix: &str) -> Result<Self, ConfigError> {
        let base = base.as_ref();
        std::fs::create_dir_all(base).map_err(|e| ConfigError::StorageDirectory {
            path: base.to_path_buf(),
            source: e,
        })?;
        let base = base
            .canonicalize()
            .map_err(|e| ConfigError::StorageDirectory {
                path: base.to_path_buf(),
                source: e,
            })?;

        Ok(Self {
            base,
            files_prefix: files_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base
    }

    fn namespace_dir(&self, job_id: &JobId) -> PathBuf {
        self.base.join(job_id.to_string())
    }

    fn object_path(&self, job_id: &JobId, name: &str) -> Result<PathBuf, StorageError> {
        validate_object_name(name)?;
        Ok(self.namespace_dir(job_id).join(name))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Maps a proxy reference (`<prefix>/<job-id>/<name>`) back to the file it
    /// names, for the download endpoint. The result is always inside the
    /// storage root.
    pub fn resolve_download(&self, reference: &str) -> Result<PathBuf, ReferenceError> {
        let invalid = || ReferenceError::InvalidReference(reference.to_string());

        let relative = reference
            .strip_prefix(&self.files_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(invalid)?;

        let (job, name) = relative.split_once('/').ok_or_else(invalid)?;
        let job_id: JobId = job.parse().map_err(|_| invalid())?;
        let path = self.object_path(&job_id, name).map_err(|_| invalid())?;

        if !path.is_file() {
            return Err(ReferenceError::MissingObject(reference.to_string()));
        }
        Ok(path)
    }

    fn namespace_ages(&self) -> Vec<(PathBuf, DateTime<Utc>)> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.base).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable storage entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(modified) => {
                    entries.push((entry.into_path(), DateTime::<Utc>::from(modified)));
                }
                None => log::warn!(
                    "Could not read modification time of {}",
                    entry.path().display()
                ),
            }
        }

        entries
    }
}

impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn create_namespace(&self, job_id: &JobId) -> Result<Namespace, StorageError> {
        let dir = self.namespace_dir(job_id);
        self.ensure_directory(&dir)?;
        Ok(Namespace {
            job_id: *job_id,
            locator: Locator::Path(dir),
        })
    }

    fn put(
        &self,
        job_id: &JobId,
        name: &str,
        data: &mut dyn Read,
    ) -> Result<ObjectRef, StorageError> {
        let target = self.object_path(job_id, name)?;
        let dir = self.namespace_dir(job_id);
        self.ensure_directory(&dir)?;

        if std::fs::symlink_metadata(&target).is_ok() {
            return Err(StorageError::ObjectExists(name.to_string()));
        }

        // Stage next to the target so the final rename stays on one filesystem
        let mut staged = NamedTempFile::new_in(&dir).map_err(|e| StorageError::WriteFile {
            path: target.clone(),
            source: e,
        })?;
        std::io::copy(data, &mut staged).map_err(|e| StorageError::WriteFile {
            path: target.clone(),
            source: e,
        })?;

        staged.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::ObjectExists(name.to_string())
            } else {
                StorageError::WriteFile {
                    path: target.clone(),
                    source: e.error,
                }
            }
        })?;

        Ok(ObjectRef {
            job_id: *job_id,
            name: name.to_string(),
            locator: Locator::Path(target),
        })
    }

    fn put_file(
        &self,
        job_id: &JobId,
        name: &str,
        path: &Path,
    ) -> Result<ObjectRef, StorageError> {
        let target = self.object_path(job_id, name)?;
        self.ensure_directory(&self.namespace_dir(job_id))?;

        let source = path.canonicalize().map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        if source != target {
            if std::fs::symlink_metadata(&target).is_ok() {
                return Err(StorageError::ObjectExists(name.to_string()));
            }
            move_file(&source, &target)?;
        }

        Ok(ObjectRef {
            job_id: *job_id,
            name: name.to_string(),
            locator: Locator::Path(target),
        })
    }

    fn resolve_path(&self, job_id: &JobId, name: &str) -> Result<Locator, StorageError> {
        self.object_path(job_id, name).map(Locator::Path)
    }

    fn working_directory(&self, job_id: &JobId) -> Option<PathBuf> {
        Some(self.namespace_dir(job_id))
    }

    fn fetch_to(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError> {
        let source = self.object_path(&object.job_id, &object.name)?;
        if source == dest {
            return Ok(());
        }
        std::fs::copy(&source, dest).map_err(|e| StorageError::ReadFile {
            path: source,
            source: e,
        })?;
        Ok(())
    }

    fn download_reference(
        &self,
        object: &ObjectRef,
        suggested_filename: &str,
    ) -> Result<DownloadReference, ReferenceError> {
        let path = self
            .object_path(&object.job_id, &object.name)
            .map_err(|e| ReferenceError::InvalidReference(e.to_string()))?;
        if !path.is_file() {
            return Err(ReferenceError::MissingObject(object.name.clone()));
        }

        Ok(DownloadReference {
            url: format!("{}/{}/{}", self.files_prefix, object.job_id, object.name),
            filename: suggested_filename.to_string(),
            content_disposition: attachment_disposition(suggested_filename),
            content_type: Some("application/octet-stream".to_string()),
            expires_at: None,
        })
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        if !self.base.exists() {
            return PurgeReport::default();
        }

        let entries = self
            .namespace_ages()
            .into_iter()
            .map(|(path, modified)| (path.display().to_string(), modified));

        purge_expired(entries, cutoff, |path: &String| std::fs::remove_dir_all(path))
    }
}
