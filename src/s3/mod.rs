//! S3-compatible object storage with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 signing (headers and presigned URLs)
//! - Size probing for streams of unknown length
//! - Multipart uploads with abort-on-failure
//! - `ObjectStoreClient`, the async facade over one bucket

pub mod client;
pub mod error;
pub mod multipart;
pub mod probe;
pub mod signer;
pub mod transport;
pub mod types;
pub mod xml;

// Re-export main types for convenience
pub use client::{ObjectReader, ObjectStoreClient};
pub use error::{KeyError, ObjectStoreError, ProviderError, Result, S3Error};
pub use multipart::{MultipartUpload, UploadState};
pub use probe::{PeekableStream, SizeProbe};
pub use signer::RequestSigner;
pub use types::{
    validate_key, Credentials, FileMetadata, MultipartUploadSession, UploadedPart, PART_SIZE,
};
