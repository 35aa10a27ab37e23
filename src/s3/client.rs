//! Object store client
//!
//! Public facade over one bucket. Every operation validates its key(s)
//! before touching the network, then maps wire failures into the
//! `ObjectStoreError` taxonomy:
//! - missing objects (`NoSuchKey`, `NotFound`, bare 404) become `FileNotFound`
//! - upload and delete failures carry the key and the wire cause
//! - construction failures are `ConnectionFailed`

use crate::config::StorageConfig;
use crate::s3::error::{ObjectStoreError, ProviderError, Result, S3Error};
use crate::s3::multipart;
use crate::s3::probe::{PeekableStream, SizeProbe};
use crate::s3::signer::{RequestSigner, EMPTY_SHA256, UNSIGNED_PAYLOAD};
use crate::s3::transport::{Exchange, Transport};
use crate::s3::types::{
    clamp_presign_minutes, validate_key, Credentials, FileMetadata, DEFAULT_CONTENT_TYPE,
    MAX_DELETE_KEYS, PART_SIZE,
};
use crate::s3::xml;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use http_body_util::BodyExt;
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Streaming object body returned by `download_file`.
///
/// Dropping the reader releases the underlying connection.
pub struct ObjectReader {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    content_length: Option<u64>,
}

impl ObjectReader {
    /// Length announced by the provider, if any
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// S3-compatible object store client bound to one bucket.
///
/// Clone is cheap and clones share the connection pool.
#[derive(Clone, Debug)]
pub struct ObjectStoreClient {
    transport: Transport,
}

impl ObjectStoreClient {
    /// Validate `config`, build the HTTP client and probe the bucket.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.resolved_endpoint();

        let signer = RequestSigner::new(Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            config.resolved_region(),
        ));
        let transport = Transport::new(
            signer,
            endpoint.clone(),
            config.bucket.clone(),
            config.timeout(),
            config.insecure_tls,
        )
        .map_err(|source| ObjectStoreError::ConnectionFailed {
            endpoint: endpoint.clone(),
            source,
        })?;

        let client = Self { transport };
        client
            .probe_bucket()
            .await
            .map_err(|source| ObjectStoreError::ConnectionFailed { endpoint, source })?;

        info!(
            endpoint = %client.transport.endpoint(),
            bucket = %client.transport.bucket(),
            "connected to object store"
        );
        Ok(client)
    }

    pub fn bucket(&self) -> &str {
        self.transport.bucket()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// HEAD bucket liveness check
    async fn probe_bucket(&self) -> std::result::Result<(), S3Error> {
        let exchange = self.head(&self.transport.bucket_url()).await?;
        head_error_for_status(exchange).map(|_| ())
    }

    async fn head(&self, url: &str) -> std::result::Result<Exchange, S3Error> {
        let response = self
            .transport
            .send(Method::HEAD, url, BTreeMap::new(), Transport::empty(), EMPTY_SHA256)
            .await?;
        Transport::collect(response).await
    }

    /// Upload exactly `size` bytes from `reader` in one streaming PUT.
    ///
    /// The body is not hashed. An empty `content_type` means
    /// `application/octet-stream`.
    pub async fn upload_file<R>(
        &self,
        key: &str,
        reader: R,
        size: u64,
        content_type: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Send + 'static,
    {
        validate_key(key)?;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type_or_default(content_type));
        headers.insert("content-length".to_string(), size.to_string());

        let url = self.transport.object_url(key);
        let body = Transport::streaming(reader.take(size));

        let result = async {
            let response = self
                .transport
                .send(Method::PUT, &url, headers, body, UNSIGNED_PAYLOAD)
                .await?;
            Transport::collect(response).await?.error_for_status()
        }
        .await;

        match result {
            Ok(_) => {
                debug!(key = %key, size, "object uploaded");
                Ok(())
            }
            Err(source) => Err(upload_failed(key, source)),
        }
    }

    /// Upload a stream of unknown length.
    ///
    /// Streams of at most 10 MiB go up as one PUT; anything larger becomes
    /// a multipart upload that is aborted if any step fails, so the key is
    /// either fully written or left absent.
    pub async fn upload_stream<R>(&self, key: &str, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_key(key)?;

        let mut stream = PeekableStream::new(reader);
        let large = stream
            .has_more_than(PART_SIZE as u64)
            .await
            .map_err(|err| upload_failed(key, err.into()))?;

        if large {
            debug!(key = %key, "stream exceeds one part, using multipart upload");
            multipart::upload(&self.transport, key, &mut stream)
                .await
                .map_err(|source| upload_failed(key, source))?;
            return Ok(());
        }

        let mut data = Vec::with_capacity(stream.buffered().len());
        stream
            .read_to_end(&mut data)
            .await
            .map_err(|err| upload_failed(key, err.into()))?;

        let size = data.len();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
        headers.insert("content-length".to_string(), size.to_string());

        self.transport
            .send_bytes(Method::PUT, &self.transport.object_url(key), headers, Bytes::from(data))
            .await
            .and_then(Exchange::error_for_status)
            .map_err(|source| upload_failed(key, source))?;

        debug!(key = %key, size, "object uploaded");
        Ok(())
    }

    /// Open an object for reading.
    pub async fn download_file(&self, key: &str) -> Result<ObjectReader> {
        validate_key(key)?;

        let response = self
            .transport
            .send(
                Method::GET,
                &self.transport.object_url(key),
                BTreeMap::new(),
                Transport::empty(),
                EMPTY_SHA256,
            )
            .await
            .map_err(|source| read_error("download", key, source))?;

        if !response.status().is_success() {
            let source = Transport::collect(response)
                .await
                .and_then(Exchange::error_for_status)
                .err()
                .unwrap_or_else(|| S3Error::InvalidResponse("unexpected response".to_string()));
            return Err(read_error("download", key, source));
        }

        let content_length = response
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let stream = response
            .into_body()
            .into_data_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));

        debug!(key = %key, content_length = ?content_length, "object download started");
        Ok(ObjectReader {
            inner: Box::pin(StreamReader::new(stream)),
            content_length,
        })
    }

    /// Delete one object. Deleting a missing key succeeds.
    pub async fn delete_file(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let result = async {
            let response = self
                .transport
                .send(
                    Method::DELETE,
                    &self.transport.object_url(key),
                    BTreeMap::new(),
                    Transport::empty(),
                    EMPTY_SHA256,
                )
                .await?;
            Transport::collect(response).await?.error_for_status()
        }
        .await;

        match result {
            Ok(_) => {
                debug!(key = %key, "object deleted");
                Ok(())
            }
            Err(source) if source.is_not_found() => {
                debug!(key = %key, "object already absent");
                Ok(())
            }
            Err(source) => Err(ObjectStoreError::DeleteFailed {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Delete many objects with batched DeleteObjects requests.
    ///
    /// Keys are validated up front. Lists longer than 1000 keys are sent
    /// as consecutive batches. Keys the provider reports as `NoSuchKey`
    /// count as deleted; any other per-key error fails the call.
    pub async fn delete_files<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            validate_key(key.as_ref())?;
        }

        for batch in keys.chunks(MAX_DELETE_KEYS) {
            self.delete_batch(batch).await?;
        }
        Ok(())
    }

    async fn delete_batch<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let first_key = keys.first().map(|k| k.as_ref()).unwrap_or_default();
        let body = xml::delete_body(keys).into_bytes();

        let md5_hash = md5::compute(&body);
        let md5_base64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &md5_hash[..]);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());
        headers.insert("content-md5".to_string(), md5_base64);

        // "?delete=" keeps the canonical query string as "delete="
        let url = format!("{}/?delete=", self.transport.bucket_url());

        let result = async {
            let exchange = self
                .transport
                .send_bytes(Method::POST, &url, headers, Bytes::from(body))
                .await?
                .error_for_status()?;
            xml::parse_delete_response(&exchange.body)
        }
        .await
        .map_err(|source| ObjectStoreError::DeleteFailed {
            key: first_key.to_string(),
            source,
        })?;

        if let Some(failure) = result.errors.iter().find(|e| e.code != "NoSuchKey") {
            warn!(
                key = %failure.key,
                code = %failure.code,
                message = %failure.message,
                "batch delete reported a failure"
            );
            return Err(ObjectStoreError::DeleteFailed {
                key: failure.key.clone(),
                source: S3Error::Provider(ProviderError {
                    status: StatusCode::OK,
                    code: failure.code.clone(),
                    message: failure.message.clone(),
                    key: Some(failure.key.clone()),
                    request_id: None,
                }),
            });
        }

        debug!(
            requested = keys.len(),
            deleted = result.deleted.len(),
            missing = result.errors.len(),
            "batch delete completed"
        );
        Ok(())
    }

    /// Presigned GET URL valid for `minutes` (non-positive means 15, capped at 60).
    pub fn get_presigned_url(&self, key: &str, minutes: i64) -> Result<String> {
        validate_key(key)?;

        let minutes = clamp_presign_minutes(minutes);
        let expires_in = Duration::from_secs(minutes as u64 * 60);
        self.transport
            .signer()
            .presign_url(&Method::GET, &self.transport.object_url(key), expires_in, Utc::now())
            .map_err(|source| read_error("presign", key, source))
    }

    /// True when the object exists; a 404 is `false`, not an error.
    pub async fn file_exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        let result = async {
            let exchange = self.head(&self.transport.object_url(key)).await?;
            head_error_for_status(exchange)
        }
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(source) if source.is_not_found() => Ok(false),
            Err(source) => Err(read_error("exists", key, source)),
        }
    }

    /// Size, content type, modification time and ETag of an object.
    pub async fn get_file_metadata(&self, key: &str) -> Result<FileMetadata> {
        validate_key(key)?;

        let exchange = async {
            let exchange = self.head(&self.transport.object_url(key)).await?;
            head_error_for_status(exchange)
        }
        .await
        .map_err(|source| read_error("stat", key, source))?;

        metadata_from_headers(&exchange.headers)
            .map_err(|source| read_error("stat", key, source))
    }
}

/// HEAD responses carry no error document; only the status is known.
fn head_error_for_status(exchange: Exchange) -> std::result::Result<Exchange, S3Error> {
    if exchange.status.is_success() {
        Ok(exchange)
    } else if exchange.body.is_empty() {
        let error = ProviderError::from_status(exchange.status);
        if !error.is_not_found() {
            warn!(status = %error.status, "s3 error response without body");
        }
        Err(S3Error::Provider(error))
    } else {
        exchange.error_for_status()
    }
}

fn content_type_or_default(content_type: &str) -> String {
    match content_type.trim() {
        "" => DEFAULT_CONTENT_TYPE.to_string(),
        ct => ct.to_string(),
    }
}

fn upload_failed(key: &str, source: S3Error) -> ObjectStoreError {
    ObjectStoreError::UploadFailed {
        key: key.to_string(),
        source,
    }
}

/// Not-found codes map to `FileNotFound`. A 404 carrying another code
/// (`NoSuchBucket`) describes the bucket, not the key, and stays a `Request`.
fn read_error(operation: &'static str, key: &str, source: S3Error) -> ObjectStoreError {
    if source.is_not_found() {
        ObjectStoreError::FileNotFound {
            key: key.to_string(),
            source,
        }
    } else {
        ObjectStoreError::Request {
            operation,
            key: key.to_string(),
            source,
        }
    }
}

fn metadata_from_headers(headers: &HeaderMap) -> std::result::Result<FileMetadata, S3Error> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let size = header("content-length")
        .ok_or_else(|| S3Error::InvalidResponse("Missing Content-Length".to_string()))?
        .parse()
        .map_err(|_| S3Error::InvalidResponse("Invalid Content-Length".to_string()))?;

    let content_type = header("content-type")
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let last_modified = header("last-modified")
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let etag = header("etag")
        .map(|v| v.trim_matches('"').to_string())
        .unwrap_or_default();

    Ok(FileMetadata {
        size,
        content_type,
        last_modified,
        etag,
    })
}
