//! stashd - async client for S3-compatible object storage

pub mod config;
pub mod s3;

pub use config::{Config, StorageConfig};
pub use s3::{ObjectReader, ObjectStoreClient, ObjectStoreError};
