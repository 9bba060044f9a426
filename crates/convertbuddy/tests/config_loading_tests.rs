//! Table-driven tests for configuration loading, validation and the
//! environment overrides applied at start-up.

use assert_fs::prelude::*;
use serial_test::serial;

use convertbuddy::config::{load_config, load_config_from_str, load_runtime_config, BackendKind};
use convertbuddy::error::ConfigError;
use convertbuddy::storage::build_backend;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full_s3",
        config_json: r#"{
            "version": "1.0",
            "storage": {
                "backend": "s3",
                "directory": "/data",
                "s3": {
                    "bucket": "conversions",
                    "endpoint_url": "http://minio:9000",
                    "region": "eu-central-1",
                    "access_key": { "env": "MINIO_ACCESS_KEY" },
                    "secret_key": { "file": "/run/secrets/minio" },
                    "force_path_style": true
                }
            },
            "retention": { "expiry_hours": 48, "sweep_interval_secs": 600 },
            "workers": { "count": 4 },
            "download": { "url_expiry_secs": 900, "files_prefix": "/downloads" },
            "tools": { "ffmpeg": "/usr/bin/ffmpeg" },
            "scratch_directory": "/var/tmp/convertbuddy"
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "object_store_alias",
        config_json: r#"{
            "version": "1.0",
            "storage": { "backend": "object-store", "s3": { "bucket": "b" } }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "wrong_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("2.0"),
    },
    ConfigTestCase {
        name: "unknown_field",
        config_json: r#"{ "version": "1.0", "retention_hours": 3 }"#,
        should_succeed: false,
        expected_error: Some("retention_hours"),
    },
    ConfigTestCase {
        name: "zero_expiry",
        config_json: r#"{ "version": "1.0", "retention": { "expiry_hours": 0 } }"#,
        should_succeed: false,
        expected_error: Some("expiry_hours"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "version": "1.0", "workers": { "count": 0 } }"#,
        should_succeed: false,
        expected_error: Some("workers.count"),
    },
    ConfigTestCase {
        name: "url_expiry_over_seven_days",
        config_json: r#"{ "version": "1.0", "download": { "url_expiry_secs": 604801 } }"#,
        should_succeed: false,
        expected_error: Some("url_expiry_secs"),
    },
    ConfigTestCase {
        name: "s3_without_section",
        config_json: r#"{ "version": "1.0", "storage": { "backend": "s3" } }"#,
        should_succeed: false,
        expected_error: Some("s3"),
    },
    ConfigTestCase {
        name: "not_json",
        config_json: "version = 1.0",
        should_succeed: false,
        expected_error: None,
    },
];

#[test]
fn test_json_config_cases() {
    for case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("{}: expected success, got {}", case.name, e),
            (false, Ok(_)) => panic!("{}: expected failure", case.name),
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "{}: error '{}' should mention '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_defaults_fill_missing_sections() {
    let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();

    assert_eq!(config.storage.backend, BackendKind::Local);
    assert_eq!(config.retention.expiry_hours, 24);
    assert_eq!(config.retention.sweep_interval_secs, 3600);
    assert_eq!(config.download.url_expiry_secs, 3600);
    assert_eq!(config.download.files_prefix, "/files");
    assert_eq!(config.tools.ffmpeg, "ffmpeg");
    assert!(config.workers.count >= 1);
    assert!(config.scratch_directory.is_none());
}

#[test]
fn test_load_config_from_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("convertbuddy.json");
    file.write_str(r#"{ "version": "1.0", "retention": { "expiry_hours": 6 } }"#)
        .unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.retention.expiry_hours, 6);
}

#[test]
fn test_missing_config_file_is_a_read_error() {
    let temp = assert_fs::TempDir::new().unwrap();
    let result = load_config(temp.child("absent.json").path());
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
}

const ENV_VARS: &[&str] = &[
    "CONVERTBUDDY_STORAGE_BACKEND",
    "CONVERTBUDDY_STORAGE_DIR",
    "CONVERTBUDDY_EXPIRY_HOURS",
    "CONVERTBUDDY_WORKER_COUNT",
    "CONVERTBUDDY_S3_BUCKET",
    "CONVERTBUDDY_S3_ACCESS_KEY",
    "CONVERTBUDDY_S3_SECRET_KEY",
    "CONVERTBUDDY_S3_ENDPOINT_URL",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("convertbuddy.json");
    file.write_str(r#"{ "version": "1.0", "retention": { "expiry_hours": 6 } }"#)
        .unwrap();

    std::env::set_var("CONVERTBUDDY_EXPIRY_HOURS", "12");
    std::env::set_var("CONVERTBUDDY_WORKER_COUNT", "3");
    let config = load_runtime_config(Some(file.path()));
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.retention.expiry_hours, 12);
    assert_eq!(config.workers.count, 3);
}

#[test]
#[serial]
fn test_invalid_env_value_is_rejected() {
    clear_env();
    std::env::set_var("CONVERTBUDDY_EXPIRY_HOURS", "a day");
    let result = load_runtime_config(None);
    clear_env();

    assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
}

#[test]
#[serial]
fn test_s3_backend_from_env() {
    clear_env();
    std::env::set_var("CONVERTBUDDY_STORAGE_BACKEND", "object-store");
    std::env::set_var("CONVERTBUDDY_S3_BUCKET", "conversions");
    std::env::set_var("CONVERTBUDDY_S3_ENDPOINT_URL", "http://127.0.0.1:9000");
    std::env::set_var("CONVERTBUDDY_S3_ACCESS_KEY", "minio");
    std::env::set_var("CONVERTBUDDY_S3_SECRET_KEY", "minio-secret");
    let config = load_runtime_config(None);
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.storage.backend, BackendKind::S3);
    let backend = build_backend(&config).unwrap();
    assert_eq!(backend.kind(), BackendKind::S3);
    assert!(backend.working_directory(&convertbuddy::JobId::new()).is_none());
}

#[test]
#[serial]
fn test_s3_backend_without_credentials_is_fatal() {
    clear_env();
    std::env::set_var("CONVERTBUDDY_STORAGE_BACKEND", "s3");
    std::env::set_var("CONVERTBUDDY_S3_BUCKET", "conversions");
    let config = load_runtime_config(None);
    clear_env();

    // Construction, not loading, is where missing credentials surface
    let config = config.unwrap();
    assert!(build_backend(&config).is_err());
}

#[test]
#[serial]
fn test_local_backend_from_env_creates_directory() {
    clear_env();
    let temp = assert_fs::TempDir::new().unwrap();
    let storage = temp.child("nested/storage");
    std::env::set_var("CONVERTBUDDY_STORAGE_DIR", storage.path());
    let config = load_runtime_config(None);
    clear_env();

    let backend = build_backend(&config.unwrap()).unwrap();
    assert_eq!(backend.kind(), BackendKind::Local);
    assert!(storage.path().is_dir());
}
