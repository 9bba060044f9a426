//! Namespaced blob storage.
//!
//! Every object lives under its job's namespace: a directory for the local
//! backend, a `jobs/<job-id>/` key prefix for S3-compatible stores. Business
//! logic only ever talks to [`StorageBackend`]; the concrete backend is chosen
//! once by [`build_backend`].

pub mod local;
pub mod namespace;
pub mod s3;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{BackendKind, Config};
use crate::error::{ConfigError, ReferenceError, StorageError};
use crate::job::JobId;
use crate::sanitize;

pub use local::LocalBackend;
pub use namespace::{input_name, sequenced_name, validate_object_name, MAX_BATCH_LEN};
pub use s3::S3Backend;

/// Backend-native location of a namespace or object. Never exposed externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Key(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Path(path) => write!(f, "{}", path.display()),
            Locator::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Handle returned by [`StorageBackend::create_namespace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub job_id: JobId,
    pub locator: Locator,
}

/// A stored object, identified by `(job_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub job_id: JobId,
    pub name: String,
    pub locator: Locator,
}

/// Externally usable download reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReference {
    /// Proxy path (local) or presigned URL (S3).
    pub url: String,
    pub filename: String,
    /// Always an `attachment` disposition.
    pub content_disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// `None` for stable references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
}

/// One uploaded stream awaiting intake.
pub struct Upload {
    pub filename: String,
    pub data: Box<dyn Read + Send>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Read + Send + 'static) -> Self {
        Self {
            filename: filename.into(),
            data: Box::new(data),
        }
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(filename, std::io::Cursor::new(bytes))
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Uniform capability interface over local and object storage.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Ensures the job's namespace exists. Idempotent.
    fn create_namespace(&self, job_id: &JobId) -> Result<Namespace, StorageError>;

    /// Writes one new object. Fails if `name` already exists or would escape
    /// the namespace.
    fn put(&self, job_id: &JobId, name: &str, data: &mut dyn Read)
        -> Result<ObjectRef, StorageError>;

    /// Stores a batch of uploads as `001_<name>`, `002_<name>`, ... so later
    /// steps can recover the submission order from the names alone. Upload
    /// names are sanitized first. Batches over [`MAX_BATCH_LEN`] are refused.
    fn put_batch(
        &self,
        job_id: &JobId,
        uploads: Vec<Upload>,
    ) -> Result<Vec<ObjectRef>, StorageError> {
        if uploads.len() > MAX_BATCH_LEN {
            return Err(StorageError::BatchTooLarge(uploads.len()));
        }
        let mut stored = Vec::with_capacity(uploads.len());
        for (index, mut upload) in uploads.into_iter().enumerate() {
            let name = sequenced_name(index + 1, &sanitize::safe_filename(&upload.filename));
            stored.push(self.put(job_id, &name, &mut upload.data)?);
        }
        Ok(stored)
    }

    /// Stores a local file as object `name`. The local backend may move the
    /// file instead of copying it.
    fn put_file(&self, job_id: &JobId, name: &str, path: &Path)
        -> Result<ObjectRef, StorageError>;

    /// Resolves `name` inside the job's namespace.
    fn resolve_path(&self, job_id: &JobId, name: &str) -> Result<Locator, StorageError>;

    /// Builds an [`ObjectRef`] for an existing name.
    fn object(&self, job_id: &JobId, name: &str) -> Result<ObjectRef, StorageError> {
        Ok(ObjectRef {
            job_id: *job_id,
            name: name.to_string(),
            locator: self.resolve_path(job_id, name)?,
        })
    }

    /// Directory external tools can read from and write to directly, if the
    /// backend has one. `None` means work happens in a scratch directory.
    fn working_directory(&self, job_id: &JobId) -> Option<PathBuf>;

    /// Copies an object's bytes to a local file.
    fn fetch_to(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError>;

    /// Produces the download reference for a deliverable.
    fn download_reference(
        &self,
        object: &ObjectRef,
        suggested_filename: &str,
    ) -> Result<DownloadReference, ReferenceError>;

    /// Deletes every namespace (local) or object (S3) last modified before
    /// `cutoff`. Individual failures are counted, never raised.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> PurgeReport;
}

/// Builds the backend selected by configuration. Missing or malformed
/// settings are fatal.
pub fn build_backend(config: &Config) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    match config.storage.backend {
        BackendKind::Local => {
            let backend =
                LocalBackend::new(&config.storage.directory, &config.download.files_prefix)?;
            Ok(Arc::new(backend))
        }
        BackendKind::S3 => {
            let s3 = config.storage.s3.as_ref().ok_or_else(|| {
                ConfigError::MissingS3Settings("storage.s3 section is required".to_string())
            })?;
            let backend = S3Backend::new(s3, config.download.url_expiry_secs)?;
            Ok(Arc::new(backend))
        }
    }
}

/// `attachment; filename="<name>"` with quotes and backslashes escaped.
pub fn attachment_disposition(filename: &str) -> String {
    let escaped: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            other => vec![other],
        })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}

/// Content-type hint derived from the file extension.
pub fn content_type_for(filename: &str) -> Option<String> {
    mime_guess::from_path(filename).first().map(|m| m.to_string())
}

/// Deletes every entry older than `cutoff`, counting failures instead of
/// stopping at the first one.
pub(crate) fn purge_expired<T, E, F>(
    entries: impl IntoIterator<Item = (T, DateTime<Utc>)>,
    cutoff: DateTime<Utc>,
    mut delete: F,
) -> PurgeReport
where
    T: fmt::Display,
    E: fmt::Display,
    F: FnMut(&T) -> Result<(), E>,
{
    let mut report = PurgeReport::default();

    for (entry, modified) in entries {
        if modified >= cutoff {
            continue;
        }
        match delete(&entry) {
            Ok(()) => {
                log::debug!("Purged expired entry {}", entry);
                report.deleted += 1;
            }
            Err(e) => {
                log::warn!("Failed to purge {}: {}", entry, e);
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_attachment_disposition_quotes_name() {
        assert_eq!(
            attachment_disposition("pages.zip"),
            "attachment; filename=\"pages.zip\""
        );
        assert_eq!(
            attachment_disposition("a\"b.pdf"),
            "attachment; filename=\"a\\\"b.pdf\""
        );
    }

    #[test]
    fn test_content_type_for_known_and_unknown() {
        assert_eq!(content_type_for("pages.zip").as_deref(), Some("application/zip"));
        assert_eq!(content_type_for("output.mp3").as_deref(), Some("audio/mpeg"));
        assert_eq!(content_type_for("blob.unknownext"), None);
    }

    #[test]
    fn test_purge_expired_respects_cutoff() {
        let now = Utc::now();
        let entries = vec![
            ("old".to_string(), now - Duration::hours(30)),
            ("new".to_string(), now - Duration::hours(1)),
        ];
        let mut deleted = Vec::new();
        let report = purge_expired(entries, now - Duration::hours(24), |name: &String| {
            deleted.push(name.clone());
            Ok::<(), String>(())
        });

        assert_eq!(report, PurgeReport { deleted: 1, failed: 0 });
        assert_eq!(deleted, vec!["old".to_string()]);
    }

    #[test]
    fn test_purge_expired_continues_after_failure() {
        let now = Utc::now();
        let old = now - Duration::hours(48);
        let entries = vec![
            ("a".to_string(), old),
            ("broken".to_string(), old),
            ("c".to_string(), old),
        ];
        let mut deleted = Vec::new();
        let report = purge_expired(entries, now, |name: &String| {
            if name == "broken" {
                return Err("permission denied".to_string());
            }
            deleted.push(name.clone());
            Ok(())
        });

        assert_eq!(report, PurgeReport { deleted: 2, failed: 1 });
        assert_eq!(deleted, vec!["a".to_string(), "c".to_string()]);
    }
}
