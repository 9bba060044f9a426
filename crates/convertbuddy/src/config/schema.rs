use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secrets::SecretSource;

/// Process-wide settings, built once at start-up and shared as `Arc<Config>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Where per-job scratch workspaces are created when the backend has no
    /// local directory. `None` means the system temp directory.
    #[serde(default)]
    pub scratch_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            workers: WorkersConfig::default(),
            download: DownloadConfig::default(),
            tools: ToolsConfig::default(),
            scratch_directory: None,
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    #[serde(alias = "object-store")]
    S3,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "s3" | "object-store" => Ok(BackendKind::S3),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Root directory for the local backend.
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

fn default_backend() -> BackendKind {
    BackendKind::Local
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("/data/storage")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            directory: default_storage_directory(),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,
    /// e.g. `http://minio:9000`; `None` targets AWS for `region`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key: SecretSource,
    #[serde(default)]
    pub secret_key: SecretSource,
    /// `true` for MinIO, `false` for AWS virtual-hosted style.
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_expiry_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Lifetime of presigned object-store URLs.
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
    /// Route prefix of the proxy endpoint serving local deliverables.
    #[serde(default = "default_files_prefix")]
    pub files_prefix: String,
}

fn default_url_expiry_secs() -> u64 {
    3600
}

fn default_files_prefix() -> String {
    "/files".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            url_expiry_secs: default_url_expiry_secs(),
            files_prefix: default_files_prefix(),
        }
    }
}

/// Program names (looked up on `PATH`) or absolute paths of the converters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm: String,
    #[serde(default = "default_magick")]
    pub magick: String,
    #[serde(default = "default_soffice")]
    pub soffice: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}

fn default_magick() -> String {
    "magick".to_string()
}

fn default_soffice() -> String {
    "soffice".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            pdftoppm: default_pdftoppm(),
            magick: default_magick(),
            soffice: default_soffice(),
        }
    }
}
