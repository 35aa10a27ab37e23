//! S3 types, limits and key validation

use crate::s3::error::KeyError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Part size for multipart uploads, also the single-PUT threshold (10 MiB)
pub const PART_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u32 = 10_000;

/// Maximum object key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Maximum number of keys in one DeleteObjects request
pub const MAX_DELETE_KEYS: usize = 1000;

/// Content type used when the caller supplies none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Default and maximum presigned URL lifetimes, in minutes
pub const DEFAULT_PRESIGN_MINUTES: i64 = 15;
pub const MAX_PRESIGN_MINUTES: i64 = 60;

/// Access credentials and signing region
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl Credentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
        }
    }
}

// Keep the secret out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Check an object key before it is used in any request.
///
/// Keys must be non-empty, at most 1024 bytes, and free of NUL bytes.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong(key.len()));
    }
    if key.as_bytes().contains(&0) {
        return Err(KeyError::NullByte);
    }
    Ok(())
}

/// Clamp a presigned URL lifetime into (0, 60] minutes.
///
/// Non-positive values mean "unset" and get the 15 minute default.
pub fn clamp_presign_minutes(minutes: i64) -> i64 {
    if minutes <= 0 {
        DEFAULT_PRESIGN_MINUTES
    } else {
        minutes.min(MAX_PRESIGN_MINUTES)
    }
}

/// Metadata snapshot from a HEAD request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    /// Object size in bytes
    pub size: u64,
    /// Content type as stored with the object
    pub content_type: String,
    /// Last modified timestamp, when the provider sent a parseable one
    pub last_modified: Option<DateTime<Utc>>,
    /// ETag without surrounding quotes
    pub etag: String,
}

/// One in-flight multipart upload. Owned by a single upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUploadSession {
    pub upload_id: String,
    pub key: String,
    pub bucket: String,
}

/// Part accepted by the provider, in upload order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart, unquoted
    pub etag: String,
    /// Bytes in this part
    pub size: usize,
}

/// Response from a CompleteMultipartUpload request
#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadResponse {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

/// Parsed DeleteObjects response
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteObjectsResult {
    /// Keys the provider confirmed as deleted
    pub deleted: Vec<String>,
    /// Per-key failures
    pub errors: Vec<DeleteError>,
}

/// Delete error information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteError {
    pub key: String,
    pub code: String,
    pub message: String,
}
