//! Error types for object store operations
//!
//! `S3Error` describes what went wrong on the wire (transport, timeout,
//! provider response, malformed XML). `ObjectStoreError` is what callers
//! of the client see: the operation-level taxonomy, each variant wrapping
//! the `S3Error` that caused it.

use hyper::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error document returned by the storage provider (`<Error>...</Error>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status of the response that carried the error
    pub status: StatusCode,
    /// Provider error code (e.g. `NoSuchKey`), empty when the body had none
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Key the provider reported the error for
    pub key: Option<String>,
    /// Provider request ID, useful when filing support tickets
    pub request_id: Option<String>,
}

impl ProviderError {
    /// Build an error that only carries a status (HEAD responses have no body)
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            code: String::new(),
            message: String::new(),
            key: None,
            request_id: None,
        }
    }

    /// True for `NoSuchKey`/`NotFound` codes, or a bare 404 without a code
    pub fn is_not_found(&self) -> bool {
        match self.code.as_str() {
            "NoSuchKey" | "NotFound" => true,
            "" => self.status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if !self.code.is_empty() {
            write!(f, " {}", self.code)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Wire-level failure underneath an object store operation
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Invalid header value: {0}")]
    Header(#[from] hyper::header::InvalidHeaderValue),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("S3 error: {0}")]
    Provider(ProviderError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

impl From<ProviderError> for S3Error {
    fn from(err: ProviderError) -> Self {
        S3Error::Provider(err)
    }
}

impl S3Error {
    /// True when the provider reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, S3Error::Provider(p) if p.is_not_found())
    }
}

/// Why an object key was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key is empty")]
    Empty,

    #[error("key is {0} bytes long, the maximum is 1024")]
    TooLong(usize),

    #[error("key contains a null byte")]
    NullByte,
}

/// Errors returned by `ObjectStoreClient`
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("file not found: {key}")]
    FileNotFound {
        key: String,
        #[source]
        source: S3Error,
    },

    #[error("upload of {key} failed: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: S3Error,
    },

    #[error("delete of {key} failed: {source}")]
    DeleteFailed {
        key: String,
        #[source]
        source: S3Error,
    },

    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: S3Error,
    },

    /// Non-2xx or transport failure of a read operation (download, head)
    #[error("{operation} {key} failed: {source}")]
    Request {
        operation: &'static str,
        key: String,
        #[source]
        source: S3Error,
    },
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::FileNotFound { .. })
    }

    /// Provider error document behind this error, if the provider sent one
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            ObjectStoreError::FileNotFound { source, .. }
            | ObjectStoreError::UploadFailed { source, .. }
            | ObjectStoreError::DeleteFailed { source, .. }
            | ObjectStoreError::ConnectionFailed { source, .. }
            | ObjectStoreError::Request { source, .. } => match source {
                S3Error::Provider(p) => Some(p),
                _ => None,
            },
            ObjectStoreError::InvalidKey(_) | ObjectStoreError::InvalidConfig(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;
