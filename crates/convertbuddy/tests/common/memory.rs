//! In-memory object store behaving like the S3 backend: keyed objects, no
//! local working directory, expiring download URLs.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use convertbuddy::config::BackendKind;
use convertbuddy::error::{ReferenceError, StorageError};
use convertbuddy::job::JobId;
use convertbuddy::storage::{
    attachment_disposition, content_type_for, validate_object_name, DownloadReference, Locator,
    Namespace, ObjectRef, PurgeReport,
};
use convertbuddy::StorageBackend;

struct StoredObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    undeletable: Mutex<HashSet<String>>,
    signing_broken: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(job_id: &JobId, name: &str) -> String {
        format!("jobs/{}/{}", job_id, name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, job_id: &JobId, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key(job_id, name))
            .map(|o| o.data.clone())
    }

    /// Backdates an object so a sweep sees it as old.
    pub fn set_modified(&self, key: &str, modified: DateTime<Utc>) {
        if let Some(object) = self.objects.lock().unwrap().get_mut(key) {
            object.modified = modified;
        }
    }

    /// Makes deletes of `key` fail.
    pub fn refuse_delete(&self, key: &str) {
        self.undeletable.lock().unwrap().insert(key.to_string());
    }

    /// Makes every `download_reference` call fail as if the credentials
    /// could not sign a URL.
    pub fn break_signing(&self) {
        self.signing_broken.store(true, Ordering::SeqCst);
    }

    fn insert(&self, job_id: &JobId, name: &str, data: Vec<u8>) -> Result<ObjectRef, StorageError> {
        validate_object_name(name)?;
        let key = Self::key(job_id, name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(StorageError::ObjectExists(key));
        }
        objects.insert(
            key.clone(),
            StoredObject {
                data,
                modified: Utc::now(),
            },
        );
        Ok(ObjectRef {
            job_id: *job_id,
            name: name.to_string(),
            locator: Locator::Key(key),
        })
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn create_namespace(&self, job_id: &JobId) -> Result<Namespace, StorageError> {
        Ok(Namespace {
            job_id: *job_id,
            locator: Locator::Key(format!("jobs/{}/", job_id)),
        })
    }

    fn put(
        &self,
        job_id: &JobId,
        name: &str,
        data: &mut dyn Read,
    ) -> Result<ObjectRef, StorageError> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)
            .map_err(|e| StorageError::ReadFile {
                path: PathBuf::from(name),
                source: e,
            })?;
        self.insert(job_id, name, bytes)
    }

    fn put_file(&self, job_id: &JobId, name: &str, path: &Path) -> Result<ObjectRef, StorageError> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.insert(job_id, name, bytes)
    }

    fn resolve_path(&self, job_id: &JobId, name: &str) -> Result<Locator, StorageError> {
        validate_object_name(name)?;
        Ok(Locator::Key(Self::key(job_id, name)))
    }

    fn working_directory(&self, _job_id: &JobId) -> Option<PathBuf> {
        None
    }

    fn fetch_to(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError> {
        let key = Self::key(&object.job_id, &object.name);
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        std::fs::write(dest, data).map_err(|e| StorageError::WriteFile {
            path: dest.to_path_buf(),
            source: e,
        })
    }

    fn download_reference(
        &self,
        object: &ObjectRef,
        suggested_filename: &str,
    ) -> Result<DownloadReference, ReferenceError> {
        if self.signing_broken.load(Ordering::SeqCst) {
            return Err(ReferenceError::Signing("credentials expired".to_string()));
        }
        let key = Self::key(&object.job_id, &object.name);
        if !self.objects.lock().unwrap().contains_key(&key) {
            return Err(ReferenceError::MissingObject(key));
        }
        Ok(DownloadReference {
            url: format!(
                "https://bucket.example.com/{}?X-Amz-Expires=3600&X-Amz-Signature=test",
                key
            ),
            filename: suggested_filename.to_string(),
            content_disposition: attachment_disposition(suggested_filename),
            content_type: content_type_for(suggested_filename),
            expires_at: Some(Utc::now() + Duration::seconds(3600)),
        })
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        let undeletable = self.undeletable.lock().unwrap();
        let mut objects = self.objects.lock().unwrap();
        let expired: Vec<String> = objects
            .iter()
            .filter(|(_, o)| o.modified < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut report = PurgeReport::default();
        for key in expired {
            if undeletable.contains(&key) {
                report.failed += 1;
            } else {
                objects.remove(&key);
                report.deleted += 1;
            }
        }
        report
    }
}
