//! S3-compatible object storage (AWS, MinIO) over the REST API.

pub mod listing;
pub mod signing;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, IF_NONE_MATCH};
use reqwest::{Method, StatusCode, Url};

use self::listing::parse_list_page;
use self::signing::{canonical_query, uri_encode, RequestTarget, Signer};
use super::{
    attachment_disposition, content_type_for, purge_expired, validate_object_name,
    DownloadReference, Locator, Namespace, ObjectRef, PurgeReport, StorageBackend,
};
use crate::config::{BackendKind, S3Config, MAX_URL_EXPIRY_SECS};
use crate::error::{ConfigError, ReferenceError, StorageError};
use crate::job::JobId;
use crate::sanitize::redact_url;

/// Every job's objects live under `jobs/<job-id>/`.
pub const KEY_PREFIX: &str = "jobs/";
const DEFAULT_REGION: &str = "us-east-1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub fn object_key(job_id: &JobId, name: &str) -> String {
    format!("{}{}/{}", KEY_PREFIX, job_id, name)
}

#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    endpoint: Url,
    path_style: bool,
    signer: Signer,
    url_expiry_secs: u64,
}

impl S3Backend {
    pub fn new(config: &S3Config, url_expiry_secs: u64) -> Result<Self, ConfigError> {
        if config.bucket.trim().is_empty() {
            return Err(ConfigError::MissingS3Settings(
                "storage.s3.bucket must be set".to_string(),
            ));
        }

        let access_key = config.access_key.resolve("storage.s3.access_key")?;
        let secret_key = config.secret_key.resolve("storage.s3.secret_key")?;

        let region = config
            .region
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION);
        let endpoint_str = match config.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => format!("https://s3.{}.amazonaws.com", region),
        };
        let endpoint = Url::parse(&endpoint_str).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint_str.clone(),
            reason: e.to_string(),
        })?;
        if endpoint.host_str().is_none() {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: endpoint_str,
                reason: "endpoint has no host".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to build object store client: {}", e),
            })?;

        log::info!(
            "Using S3 bucket '{}' at {} ({} style)",
            config.bucket,
            redact_url(endpoint.as_str()),
            if config.force_path_style { "path" } else { "virtual-hosted" }
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            endpoint,
            path_style: config.force_path_style,
            signer: Signer::new(access_key, secret_key, region),
            url_expiry_secs,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        let host = if self.path_style {
            host.to_string()
        } else {
            format!("{}.{}", self.bucket, host)
        };
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }

    /// Request path for `key`, or for the bucket itself when `key` is `None`.
    fn request_path(&self, key: Option<&str>) -> String {
        let encoded = key.map(|k| uri_encode(k, true)).unwrap_or_default();
        if self.path_style {
            match key {
                Some(_) => format!("/{}/{}", uri_encode(&self.bucket, false), encoded),
                None => format!("/{}", uri_encode(&self.bucket, false)),
            }
        } else {
            format!("/{}", encoded)
        }
    }

    fn url(&self, host: &str, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}://{}{}", self.endpoint.scheme(), host, path)
        } else {
            format!("{}://{}{}?{}", self.endpoint.scheme(), host, path, query)
        }
    }

    fn key_for(&self, job_id: &JobId, name: &str) -> Result<String, StorageError> {
        validate_object_name(name)?;
        Ok(object_key(job_id, name))
    }

    /// Signs and sends one request. `build` may add headers or a body.
    fn send<F>(
        &self,
        method: Method,
        key: Option<&str>,
        query: Vec<(String, String)>,
        build: F,
    ) -> Result<Response, StorageError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let label = key.unwrap_or(&self.bucket).to_string();
        let host = self.host();
        let path = self.request_path(key);
        let target = RequestTarget {
            method: method.as_str(),
            host: &host,
            path: &path,
            query,
        };

        let signed = self
            .signer
            .sign_headers(&target, Utc::now())
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        let url = self.url(&host, &path, &canonical_query(&target.query));

        let request = self
            .client
            .request(method.clone(), url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, signed.authorization);

        build(request).send().map_err(|e| StorageError::Request {
            key: label,
            message: e.to_string(),
        })
    }

    fn status_error(key: &str, response: Response) -> StorageError {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        StorageError::Status {
            key: key.to_string(),
            status,
            body: body.chars().take(512).collect(),
        }
    }

    fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let response = self.send(Method::PUT, Some(key), Vec::new(), |request| {
            request.header(IF_NONE_MATCH, "*").body(bytes)
        })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                Err(StorageError::ObjectExists(key.to_string()))
            }
            _ => Err(Self::status_error(key, response)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let response = self.send(Method::HEAD, Some(key), Vec::new(), |r| r)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::status_error(key, response)),
        }
    }

    fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let response = self.send(Method::DELETE, Some(key), Vec::new(), |r| r)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::status_error(key, response)),
        }
    }

    fn list_page(
        &self,
        continuation: Option<&str>,
    ) -> Result<listing::ListPage, StorageError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), KEY_PREFIX.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let response = self.send(Method::GET, None, query, |r| r)?;
        if !response.status().is_success() {
            return Err(Self::status_error(&self.bucket, response));
        }
        let body = response.text().map_err(|e| StorageError::Request {
            key: self.bucket.clone(),
            message: e.to_string(),
        })?;
        parse_list_page(&body)
    }

    /// Builds a presigned GET for `key` that forces an attachment download.
    fn presigned_get(
        &self,
        key: &str,
        filename: &str,
        now: DateTime<Utc>,
    ) -> Result<DownloadReference, ReferenceError> {
        if self.url_expiry_secs > MAX_URL_EXPIRY_SECS {
            return Err(ReferenceError::ExpiryTooLong(self.url_expiry_secs));
        }

        let disposition = attachment_disposition(filename);
        let content_type = content_type_for(filename);

        let mut query = vec![(
            "response-content-disposition".to_string(),
            disposition.clone(),
        )];
        if let Some(content_type) = &content_type {
            query.push(("response-content-type".to_string(), content_type.clone()));
        }

        let host = self.host();
        let path = self.request_path(Some(key));
        let target = RequestTarget {
            method: "GET",
            host: &host,
            path: &path,
            query,
        };
        let query = self
            .signer
            .presign(&target, self.url_expiry_secs, now)
            .map_err(|e| ReferenceError::Signing(e.to_string()))?;

        Ok(DownloadReference {
            url: self.url(&host, &path, &query),
            filename: filename.to_string(),
            content_disposition: disposition,
            content_type,
            expires_at: Some(now + chrono::Duration::seconds(self.url_expiry_secs as i64)),
        })
    }
}

impl StorageBackend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn create_namespace(&self, job_id: &JobId) -> Result<Namespace, StorageError> {
        // Prefixes need no creation in an object store
        Ok(Namespace {
            job_id: *job_id,
            locator: Locator::Key(format!("{}{}/", KEY_PREFIX, job_id)),
        })
    }

    fn put(
        &self,
        job_id: &JobId,
        name: &str,
        data: &mut dyn Read,
    ) -> Result<ObjectRef, StorageError> {
        let key = self.key_for(job_id, name)?;
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)
            .map_err(|e| StorageError::Request {
                key: key.clone(),
                message: format!("failed to read upload: {}", e),
            })?;

        self.put_bytes(&key, bytes)?;
        log::debug!("Stored object {}", key);

        Ok(ObjectRef {
            job_id: *job_id,
            name: name.to_string(),
            locator: Locator::Key(key),
        })
    }

    fn put_file(
        &self,
        job_id: &JobId,
        name: &str,
        path: &Path,
    ) -> Result<ObjectRef, StorageError> {
        let mut file = File::open(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.put(job_id, name, &mut file)
    }

    fn resolve_path(&self, job_id: &JobId, name: &str) -> Result<Locator, StorageError> {
        self.key_for(job_id, name).map(Locator::Key)
    }

    fn working_directory(&self, _job_id: &JobId) -> Option<PathBuf> {
        None
    }

    fn fetch_to(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError> {
        let key = self.key_for(&object.job_id, &object.name)?;
        let mut response = self.send(Method::GET, Some(&key), Vec::new(), |r| r)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(key)),
            _ => return Err(Self::status_error(&key, response)),
        }

        let mut file = File::create(dest).map_err(|e| StorageError::WriteFile {
            path: dest.to_path_buf(),
            source: e,
        })?;
        response
            .copy_to(&mut file)
            .map_err(|e| StorageError::Request {
                key,
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn download_reference(
        &self,
        object: &ObjectRef,
        suggested_filename: &str,
    ) -> Result<DownloadReference, ReferenceError> {
        let key = self
            .key_for(&object.job_id, &object.name)
            .map_err(|e| ReferenceError::InvalidReference(e.to_string()))?;

        match self.exists(&key) {
            Ok(true) => {}
            Ok(false) => return Err(ReferenceError::MissingObject(key)),
            Err(e) => return Err(ReferenceError::Lookup(e.to_string())),
        }

        self.presigned_get(&key, suggested_filename, Utc::now())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        let mut report = PurgeReport::default();
        let mut token: Option<String> = None;

        loop {
            let page = match self.list_page(token.as_deref()) {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("Listing bucket '{}' failed: {}", self.bucket, e);
                    return report;
                }
            };

            let entries = page
                .objects
                .into_iter()
                .map(|object| (object.key, object.last_modified));
            let page_report = purge_expired(entries, cutoff, |key: &String| {
                self.delete_object(key)
            });
            report.deleted += page_report.deleted;
            report.failed += page_report.failed;

            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => return report,
            }
        }
    }
}
