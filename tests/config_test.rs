use std::env;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use stashd::ObjectStoreError;

// Environment variables are process-wide; env tests take this lock
static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_VARS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_REGION",
    "S3_KEY",
    "S3_SECRET",
    "S3_BUCKET",
    "S3_ENDPOINT",
    "S3_REQUEST_TIMEOUT",
    "S3_INSECURE_TLS",
];

/// Run `f` with only the given variables set, restoring the originals afterwards
fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let saved: Vec<(&str, Option<String>)> =
        ENV_VARS.iter().map(|name| (*name, env::var(name).ok())).collect();
    for name in ENV_VARS {
        env::remove_var(name);
    }
    for (name, value) in vars {
        env::set_var(name, value);
    }

    f();

    for (name, value) in saved {
        match value {
            Some(v) => env::set_var(name, v),
            None => env::remove_var(name),
        }
    }
}

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
profiles:
  minio:
    endpoint: http://localhost:9000
    access_key: AKIATEST
    secret_key: secrettest
    region: us-west-2
    bucket: test-bucket
    request_timeout: 120
    insecure_tls: true
  aws:
    access_key: AKIAOTHER
    secret_key: secretother
    bucket: other-bucket

default_profile: minio
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = stashd::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.profiles.len(), 2);
    assert_eq!(config.default_profile, Some("minio".to_string()));

    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.resolved_endpoint(), "http://localhost:9000");
    assert_eq!(profile.access_key, "AKIATEST");
    assert_eq!(profile.secret_key, "secrettest");
    assert_eq!(profile.region, "us-west-2");
    assert_eq!(profile.bucket, "test-bucket");
    assert_eq!(profile.timeout(), Duration::from_secs(120));
    assert!(profile.insecure_tls);

    let aws = config.get_profile(Some("aws")).unwrap();
    assert_eq!(aws.region, "us-east-1");
    assert_eq!(aws.resolved_endpoint(), "https://s3.us-east-1.amazonaws.com");
}

/// Test selecting a profile through load_config
#[test]
fn test_load_config_with_profile() {
    let yaml = r#"
profiles:
  a:
    access_key: ka
    secret_key: sa
    bucket: bucket-a
  b:
    access_key: kb
    secret_key: sb
    bucket: bucket-b
default_profile: a
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();
    let path = config_path.to_str().unwrap();

    let config = stashd::config::load_config(Some(path), Some("b")).unwrap();
    assert_eq!(config.get_profile(None).unwrap().bucket, "bucket-b");

    let err = stashd::config::load_config(Some(path), Some("missing")).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

/// Test missing and malformed config files
#[test]
fn test_invalid_config_files() {
    let temp_dir = TempDir::new().unwrap();

    let missing = temp_dir.path().join("nope.yaml");
    assert!(stashd::config::load_from_yaml(&missing).is_err());

    let broken = temp_dir.path().join("broken.yaml");
    fs::write(&broken, "profiles: [not, a, map").unwrap();
    assert!(stashd::config::load_from_yaml(&broken).is_err());

    // A profile without a bucket does not deserialize
    let incomplete = temp_dir.path().join("incomplete.yaml");
    fs::write(
        &incomplete,
        "profiles:\n  x:\n    access_key: k\n    secret_key: s\n",
    )
    .unwrap();
    assert!(stashd::config::load_from_yaml(&incomplete).is_err());
}

/// Test loading configuration from environment variables (AWS standard format)
#[test]
fn test_load_env_config_aws_format() {
    with_env(
        &[
            ("AWS_ACCESS_KEY_ID", "test_key"),
            ("AWS_SECRET_ACCESS_KEY", "test_secret"),
            ("AWS_REGION", "eu-west-1"),
            ("S3_BUCKET", "test-bucket"),
            ("S3_ENDPOINT", "https://minio.test.com"),
            ("S3_REQUEST_TIMEOUT", "30"),
            ("S3_INSECURE_TLS", "1"),
        ],
        || {
            let config = stashd::config::load_from_env().unwrap();

            assert_eq!(config.profiles.len(), 1);
            assert_eq!(config.default_profile, Some("default".to_string()));

            let profile = config.get_profile(None).unwrap();
            assert_eq!(profile.access_key, "test_key");
            assert_eq!(profile.secret_key, "test_secret");
            assert_eq!(profile.region, "eu-west-1");
            assert_eq!(profile.bucket, "test-bucket");
            assert_eq!(profile.resolved_endpoint(), "https://minio.test.com");
            assert_eq!(profile.request_timeout, 30);
            assert!(profile.insecure_tls);
        },
    );
}

/// Test loading configuration from environment variables (short aliases)
#[test]
fn test_load_env_config_short_format() {
    with_env(
        &[
            ("S3_KEY", "short_key"),
            ("S3_SECRET", "short_secret"),
            ("S3_BUCKET", "files"),
        ],
        || {
            let config = stashd::config::load_from_env().unwrap();
            let profile = config.get_profile(None).unwrap();

            assert_eq!(profile.access_key, "short_key");
            assert_eq!(profile.secret_key, "short_secret");
            assert_eq!(profile.region, "us-east-1");
            assert_eq!(profile.endpoint, None);
            assert_eq!(profile.resolved_endpoint(), "https://s3.us-east-1.amazonaws.com");
            assert!(!profile.insecure_tls);
        },
    );
}

/// Test that missing environment variables are reported
#[test]
fn test_load_env_config_missing_vars() {
    with_env(&[("AWS_ACCESS_KEY_ID", "k"), ("AWS_SECRET_ACCESS_KEY", "s")], || {
        let err = stashd::config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    });

    with_env(&[("S3_BUCKET", "b")], || {
        assert!(stashd::config::load_from_env().is_err());
    });

    with_env(
        &[
            ("S3_KEY", "k"),
            ("S3_SECRET", "s"),
            ("S3_BUCKET", "b"),
            ("S3_REQUEST_TIMEOUT", "soon"),
        ],
        || {
            let err = stashd::config::load_from_env().unwrap_err();
            assert!(err.to_string().contains("S3_REQUEST_TIMEOUT"));
        },
    );
}

/// Test that invalid settings are rejected before connecting
#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let config = stashd::StorageConfig::new("", "key", "secret");
    let err = stashd::ObjectStoreClient::connect(&config).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::InvalidConfig(_)));

    let config = stashd::StorageConfig::new("bucket", "key", "secret").with_endpoint("localhost:9000");
    let err = stashd::ObjectStoreClient::connect(&config).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::InvalidConfig(_)));
}
