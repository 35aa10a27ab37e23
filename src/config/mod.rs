use crate::s3::error::ObjectStoreError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Connection settings for one bucket on one S3-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Endpoint base URL; derived from the region when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bucket name
    pub bucket: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Signing region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl StorageConfig {
    pub fn new(
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: None,
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            request_timeout: default_request_timeout(),
            insecure_tls: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.as_secs().max(1);
        self
    }

    /// Region to sign with; blank means the default
    pub fn resolved_region(&self) -> &str {
        match self.region.trim() {
            "" => "us-east-1",
            region => region,
        }
    }

    /// Endpoint to talk to; derived from the region when not configured
    pub fn resolved_endpoint(&self) -> String {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint.trim_end_matches('/').to_string(),
            _ => format!("https://s3.{}.amazonaws.com", self.resolved_region()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Check the settings the client cannot work without
    pub fn validate(&self) -> std::result::Result<(), ObjectStoreError> {
        let invalid = |msg: &str| Err(ObjectStoreError::InvalidConfig(msg.to_string()));

        if self.bucket.trim().is_empty() {
            return invalid("bucket is required");
        }
        if self.bucket.contains('/') {
            return invalid("bucket name must not contain '/'");
        }
        if self.access_key.trim().is_empty() {
            return invalid("access key is required");
        }
        if self.secret_key.is_empty() {
            return invalid("secret key is required");
        }
        if self.request_timeout == 0 {
            return invalid("request timeout must be at least one second");
        }
        let endpoint = self.resolved_endpoint();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ObjectStoreError::InvalidConfig(format!(
                "endpoint must start with http:// or https://: {}",
                endpoint
            )));
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named storage profiles
    #[serde(default)]
    pub profiles: HashMap<String, StorageConfig>,

    /// Profile used when none is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl Config {
    /// Get a profile by name, or the default profile if not specified
    ///
    /// Without a name or `default_profile`, a lone profile is used. Several
    /// profiles with no default select nothing.
    pub fn get_profile(&self, name: Option<&str>) -> Option<&StorageConfig> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else if self.profiles.len() == 1 {
            self.profiles.values().next()
        } else {
            None
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Supports both AWS standard variables and short aliases:
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - AWS_REGION (optional, defaults to us-east-1)
/// - S3_BUCKET
/// - S3_ENDPOINT (optional, derived from the region when unset)
/// - S3_REQUEST_TIMEOUT (optional, seconds)
/// - S3_INSECURE_TLS (optional, "true" or "1")
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("S3_KEY"))
        .context("Neither AWS_ACCESS_KEY_ID nor S3_KEY environment variable is set")?;

    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("S3_SECRET"))
        .context("Neither AWS_SECRET_ACCESS_KEY nor S3_SECRET environment variable is set")?;

    let bucket = std::env::var("S3_BUCKET").context("S3_BUCKET environment variable not set")?;

    let mut storage = StorageConfig::new(bucket, access_key, secret_key);

    if let Ok(region) = std::env::var("AWS_REGION") {
        storage.region = region;
    }

    if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
        if !endpoint.trim().is_empty() {
            storage.endpoint = Some(endpoint);
        }
    }

    if let Ok(timeout) = std::env::var("S3_REQUEST_TIMEOUT") {
        storage.request_timeout = timeout
            .parse()
            .context(format!("Invalid S3_REQUEST_TIMEOUT: {}", timeout))?;
    }

    if let Ok(insecure) = std::env::var("S3_INSECURE_TLS") {
        storage.insecure_tls = insecure == "true" || insecure == "1";
    }

    let mut config = Config::default();
    config.profiles.insert("default".to_string(), storage);
    config.default_profile = Some("default".to_string());

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables. A requested profile must exist in the file.
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
