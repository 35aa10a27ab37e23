//! Multipart upload protocol
//!
//! One `MultipartUpload` per logical upload call:
//!
//! ```text
//! NotStarted -> Initiated -> PartsUploading -> Completed
//!                    \              \
//!                     +--------------+-----> Aborted
//! ```
//!
//! `MultipartUpload::run` drives the whole sequence and aborts the session on any
//! failure after initiation, so the provider never keeps orphaned parts
//! and the key is either fully written or absent.

use crate::s3::error::S3Error;
use crate::s3::signer::{EMPTY_SHA256, UNSIGNED_PAYLOAD};
use crate::s3::transport::Transport;
use crate::s3::types::{
    CompleteMultipartUploadResponse, MultipartUploadSession, UploadedPart, MAX_PARTS, PART_SIZE,
};
use crate::s3::xml;
use bytes::Bytes;
use hyper::Method;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Lifecycle of a multipart upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Initiated,
    PartsUploading,
    Completed,
    Aborted,
}

/// Multipart upload state machine bound to one key
pub struct MultipartUpload<'a> {
    transport: &'a Transport,
    key: String,
    session: Option<MultipartUploadSession>,
    parts: Vec<UploadedPart>,
    state: UploadState,
    part_size: usize,
    max_parts: u32,
}

impl<'a> MultipartUpload<'a> {
    pub fn new(transport: &'a Transport, key: &str) -> Self {
        Self {
            transport,
            key: key.to_string(),
            session: None,
            parts: Vec::new(),
            state: UploadState::NotStarted,
            part_size: PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }

    /// Override the part size and part count limits (10 MiB and 10000).
    ///
    /// Providers with stricter limits need smaller values; every part but
    /// the last is exactly `part_size` bytes.
    pub fn with_limits(mut self, part_size: usize, max_parts: u32) -> Self {
        self.part_size = part_size.max(1);
        self.max_parts = max_parts.max(1);
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> Option<&MultipartUploadSession> {
        self.session.as_ref()
    }

    /// Parts uploaded so far, in ascending part-number order
    pub fn parts(&self) -> &[UploadedPart] {
        &self.parts
    }

    fn expect_state(&self, allowed: &[UploadState], action: &str) -> Result<(), S3Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(S3Error::InvalidRequest(format!(
                "cannot {} a multipart upload in state {:?}",
                action, self.state
            )))
        }
    }

    fn upload_id_query(upload_id: &str) -> String {
        let mut query = String::with_capacity(upload_id.len() + 16);
        query.push_str("?uploadId=");
        Transport::url_encode_into(&mut query, upload_id);
        query
    }

    fn active_session(&self) -> Result<&MultipartUploadSession, S3Error> {
        self.session
            .as_ref()
            .ok_or_else(|| S3Error::InvalidRequest("multipart upload has no session".to_string()))
    }

    /// Initiate the upload (POST `?uploads`).
    ///
    /// On failure no session exists and nothing needs aborting.
    pub async fn initiate(&mut self) -> Result<&MultipartUploadSession, S3Error> {
        self.expect_state(&[UploadState::NotStarted], "initiate")?;

        let url = format!("{}?uploads", self.transport.object_url(&self.key));
        let exchange = self
            .transport
            .send_bytes(Method::POST, &url, BTreeMap::new(), Bytes::new())
            .await?
            .error_for_status()?;
        let upload_id = xml::parse_initiate_response(&exchange.body)?;

        debug!(key = %self.key, upload_id = %upload_id, "multipart upload initiated");
        self.state = UploadState::Initiated;
        Ok(self.session.insert(MultipartUploadSession {
            upload_id,
            key: self.key.clone(),
            bucket: self.transport.bucket().to_string(),
        }))
    }

    /// Read the source in part-sized chunks and upload each one.
    ///
    /// Only the final chunk may be short. Fails on an empty source and when
    /// the source would need more than `max_parts` parts; the caller must abort.
    pub async fn upload_parts<R>(&mut self, reader: &mut R) -> Result<(), S3Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.expect_state(&[UploadState::Initiated], "upload parts of")?;
        self.state = UploadState::PartsUploading;

        loop {
            let chunk = read_chunk(reader, self.part_size).await?;
            if chunk.is_empty() {
                break;
            }

            let part_number = self.parts.len() as u32 + 1;
            if part_number > self.max_parts {
                return Err(S3Error::InvalidRequest(format!(
                    "object needs more than {} parts of {} bytes",
                    self.max_parts, self.part_size
                )));
            }

            let part = self.upload_part(part_number, Bytes::from(chunk)).await?;
            self.parts.push(part);
        }

        if self.parts.is_empty() {
            return Err(S3Error::InvalidRequest(
                "multipart upload needs at least one part".to_string(),
            ));
        }
        Ok(())
    }

    /// Upload one part (PUT `?partNumber=N&uploadId=...`) and capture its ETag
    async fn upload_part(&self, part_number: u32, data: Bytes) -> Result<UploadedPart, S3Error> {
        let session = self.active_session()?;
        let mut url = self.transport.object_url(&session.key);
        let _ = write!(url, "?partNumber={}&uploadId=", part_number);
        Transport::url_encode_into(&mut url, &session.upload_id);

        let size = data.len();
        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), size.to_string());

        // Parts are not hashed; the body is sent as-is
        let response = self
            .transport
            .send(Method::PUT, &url, headers, Transport::full(data), UNSIGNED_PAYLOAD)
            .await?;
        let exchange = Transport::collect(response).await?.error_for_status()?;

        let etag = exchange
            .header("etag")
            .map(|s| s.trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                S3Error::InvalidResponse(format!("Missing ETag for part {}", part_number))
            })?;

        debug!(key = %session.key, part_number, size, "part uploaded");
        Ok(UploadedPart {
            part_number,
            etag,
            size,
        })
    }

    /// Complete the upload (POST `?uploadId=...` with the part manifest)
    pub async fn complete(&mut self) -> Result<CompleteMultipartUploadResponse, S3Error> {
        self.expect_state(&[UploadState::PartsUploading], "complete")?;
        let session = self.active_session()?;

        let url = format!(
            "{}{}",
            self.transport.object_url(&session.key),
            Self::upload_id_query(&session.upload_id)
        );
        let manifest = xml::complete_manifest(&self.parts).into_bytes();

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), manifest.len().to_string());

        let exchange = self
            .transport
            .send_bytes(Method::POST, &url, headers, Bytes::from(manifest))
            .await?
            .error_for_status()?;
        let response = xml::parse_complete_response(exchange.status, &exchange.body)?;

        info!(
            key = %session.key,
            upload_id = %session.upload_id,
            parts = self.parts.len(),
            bytes = self.parts.iter().map(|p| p.size as u64).sum::<u64>(),
            "multipart upload completed"
        );
        self.state = UploadState::Completed;
        Ok(response)
    }

    /// Abort the upload (DELETE `?uploadId=...`), discarding uploaded parts
    pub async fn abort(&mut self) -> Result<(), S3Error> {
        self.expect_state(&[UploadState::Initiated, UploadState::PartsUploading], "abort")?;
        let session = self.active_session()?;

        let url = format!(
            "{}{}",
            self.transport.object_url(&session.key),
            Self::upload_id_query(&session.upload_id)
        );
        let response = self
            .transport
            .send(Method::DELETE, &url, BTreeMap::new(), Transport::empty(), EMPTY_SHA256)
            .await?;
        Transport::collect(response).await?.error_for_status()?;

        debug!(key = %session.key, upload_id = %session.upload_id, "multipart upload aborted");
        self.state = UploadState::Aborted;
        Ok(())
    }

    /// Drive the whole upload: initiate, upload every part, complete.
    ///
    /// Any failure after initiation aborts the session before the original
    /// error is returned. An abort failure is logged, never returned.
    pub async fn run<R>(mut self, reader: &mut R) -> Result<CompleteMultipartUploadResponse, S3Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.initiate().await?;

        let result = match self.upload_parts(reader).await {
            Ok(()) => self.complete().await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(key = %self.key, parts = self.parts.len(), error = %err, "multipart upload failed, aborting");
                if let Err(abort_err) = self.abort().await {
                    warn!(key = %self.key, error = %abort_err, "abort of failed multipart upload failed");
                }
                Err(err)
            }
        }
    }
}

/// Read up to `size` bytes, tolerating short reads from the source
async fn read_chunk<R>(reader: &mut R, size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = Vec::with_capacity(size);
    reader.take(size as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Upload `reader` to `key` as a multipart upload with the default limits.
pub async fn upload<R>(
    transport: &Transport,
    key: &str,
    reader: &mut R,
) -> Result<CompleteMultipartUploadResponse, S3Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    MultipartUpload::new(transport, key).run(reader).await
}
