use std::path::{Path, PathBuf};

use crate::config::schema::{BackendKind, Config, S3Config};
use crate::error::ConfigError;
use crate::secrets::SecretSource;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Prefix of every environment override, e.g. `CONVERTBUDDY_EXPIRY_HOURS`.
pub const ENV_PREFIX: &str = "CONVERTBUDDY_";

/// Upper bound S3 accepts for presigned URL lifetimes (7 days).
pub const MAX_URL_EXPIRY_SECS: u64 = 604_800;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Builds the start-up configuration: defaults, then the optional file, then
/// `CONVERTBUDDY_*` environment overrides.
pub fn load_runtime_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Applies overrides found through `lookup`, which receives the full variable
/// name including [`ENV_PREFIX`].
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| -> Option<(String, String)> {
        let name = format!("{}{}", ENV_PREFIX, key);
        lookup(&name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (name, v))
    };

    if let Some((name, value)) = get("STORAGE_BACKEND") {
        config.storage.backend = value
            .parse::<BackendKind>()
            .map_err(|_| ConfigError::InvalidEnv { name, value })?;
    }
    if let Some((_, value)) = get("STORAGE_DIR") {
        config.storage.directory = PathBuf::from(value);
    }
    if let Some((_, value)) = get("SCRATCH_DIR") {
        config.scratch_directory = Some(PathBuf::from(value));
    }
    if let Some((name, value)) = get("EXPIRY_HOURS") {
        config.retention.expiry_hours = parse_number(&name, &value)?;
    }
    if let Some((name, value)) = get("SWEEP_INTERVAL_SECS") {
        config.retention.sweep_interval_secs = parse_number(&name, &value)?;
    }
    if let Some((name, value)) = get("WORKER_COUNT") {
        config.workers.count = parse_number(&name, &value)?;
    }
    if let Some((name, value)) = get("DOWNLOAD_URL_EXPIRY_SECS") {
        config.download.url_expiry_secs = parse_number(&name, &value)?;
    }

    let s3_keys = [
        "S3_BUCKET",
        "S3_ENDPOINT_URL",
        "S3_REGION",
        "S3_ACCESS_KEY",
        "S3_SECRET_KEY",
        "S3_FORCE_PATH_STYLE",
    ];
    if s3_keys.iter().any(|k| get(k).is_some()) {
        let s3 = config.storage.s3.get_or_insert_with(|| S3Config {
            force_path_style: true,
            ..S3Config::default()
        });

        if let Some((_, value)) = get("S3_BUCKET") {
            s3.bucket = value;
        }
        if let Some((_, value)) = get("S3_ENDPOINT_URL") {
            s3.endpoint_url = Some(value);
        }
        if let Some((_, value)) = get("S3_REGION") {
            s3.region = Some(value);
        }
        if let Some((_, value)) = get("S3_ACCESS_KEY") {
            s3.access_key = SecretSource::direct(value);
        }
        if let Some((_, value)) = get("S3_SECRET_KEY") {
            s3.secret_key = SecretSource::direct(value);
        }
        if let Some((name, value)) = get("S3_FORCE_PATH_STYLE") {
            s3.force_path_style = parse_bool(&name, &value)?;
        }
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.retention.expiry_hours == 0 {
        return Err(ConfigError::Validation {
            message: "retention.expiry_hours must be at least 1".to_string(),
        });
    }

    if config.retention.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "retention.sweep_interval_secs must be at least 1".to_string(),
        });
    }

    if config.workers.count == 0 {
        return Err(ConfigError::Validation {
            message: "workers.count must be at least 1".to_string(),
        });
    }

    if config.download.url_expiry_secs == 0
        || config.download.url_expiry_secs > MAX_URL_EXPIRY_SECS
    {
        return Err(ConfigError::Validation {
            message: format!(
                "download.url_expiry_secs must be between 1 and {}",
                MAX_URL_EXPIRY_SECS
            ),
        });
    }

    if !config.download.files_prefix.starts_with('/') {
        return Err(ConfigError::Validation {
            message: "download.files_prefix must start with '/'".to_string(),
        });
    }

    if config.storage.backend == BackendKind::S3 && config.storage.s3.is_none() {
        return Err(ConfigError::MissingS3Settings(
            "storage.backend is 's3' but no storage.s3 section is configured".to_string(),
        ));
    }

    Ok(())
}
