pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, load_runtime_config, validate_config,
    ENV_PREFIX, MAX_URL_EXPIRY_SECS,
};
pub use schema::{
    BackendKind, Config, DownloadConfig, RetentionConfig, S3Config, StorageConfig, ToolsConfig,
    WorkersConfig,
};
