//! Signed HTTP exchange with an S3-compatible endpoint
//!
//! Shared by the client facade and the multipart uploader:
//! - HTTP/1.1 hyper client over native-tls
//! - path-style URLs (`{endpoint}/{bucket}/{key}`)
//! - every request signed right before it is sent
//! - one client-level timeout, applied up to the response headers
//! - no retries; failures surface to the caller as-is

use crate::s3::error::S3Error;
use crate::s3::signer::RequestSigner;
use crate::s3::xml;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Outbound request body: buffered bytes or a streamed reader
pub type Body = UnsyncBoxBody<Bytes, io::Error>;

type HttpClient = HyperClient<HttpsConnector<HttpConnector>, Body>;

/// Fully collected response
#[derive(Debug)]
pub struct Exchange {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Exchange {
    /// Turn a non-2xx response into a parsed provider error
    pub fn error_for_status(self) -> Result<Self, S3Error> {
        if self.status.is_success() {
            return Ok(self);
        }

        let error = xml::parse_error(self.status, &self.body);
        if error.is_not_found() {
            // Expected by exists/delete; callers decide whether it matters
            debug!(status = %error.status, code = %error.code, "object not found");
        } else {
            warn!(
                status = %error.status,
                code = %error.code,
                message = %error.message,
                request_id = ?error.request_id,
                "s3 error response"
            );
        }
        Err(S3Error::Provider(error))
    }

    /// Header value as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Signed transport bound to one endpoint and bucket.
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct Transport {
    client: HttpClient,
    signer: RequestSigner,
    endpoint: String,
    bucket: String,
    timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        signer: RequestSigner,
        endpoint: String,
        bucket: String,
        timeout: Duration,
        insecure_tls: bool,
    ) -> Result<Self, S3Error> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            warn!("insecure TLS enabled: certificate verification is disabled");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?
        } else {
            TlsConnector::new()?
        };

        let https = HttpsConnector::from((http, tls.into()));
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            signer,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            timeout,
        })
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Encode an S3 key, preserving forward slashes.
    /// Returns Cow::Borrowed when no encoding is needed.
    pub fn encode_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }
        Cow::Owned(RequestSigner::uri_encode(key, false))
    }

    /// Encode a query parameter value into an existing buffer (RFC 3986)
    pub fn url_encode_into(buf: &mut String, s: &str) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }

    /// Bucket URL (no key)
    pub fn bucket_url(&self) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + 1 + self.bucket.len());
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(&self.bucket);
        url
    }

    /// Object URL with the key encoded
    pub fn object_url(&self, key: &str) -> String {
        let encoded_key = Self::encode_key(key);
        let mut url = self.bucket_url();
        url.reserve(1 + encoded_key.len());
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    pub fn empty() -> Body {
        Self::full(Bytes::new())
    }

    pub fn full(data: Bytes) -> Body {
        Full::new(data).map_err(|never| match never {}).boxed_unsync()
    }

    /// Body that streams from a reader without buffering it
    pub fn streaming<R>(reader: R) -> Body
    where
        R: AsyncRead + Send + 'static,
    {
        StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)).boxed_unsync()
    }

    /// Sign and send one request, returning the response with its body unread
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Body,
        payload_hash: &str,
    ) -> Result<Response<Incoming>, S3Error> {
        debug!(method = %method, url = %url, "s3 request");

        let mut req = Request::builder().method(method).uri(url);
        for (key, value) in headers.iter() {
            req = req.header(key, value);
        }
        let mut request = req.body(body)?;
        self.signer.sign(&mut request, payload_hash, Utc::now())?;

        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(S3Error::Timeout(self.timeout)),
        }
    }

    /// Send a request with an in-memory body (hashed for signing) and collect the response
    pub async fn send_bytes(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<Exchange, S3Error> {
        let payload_hash = RequestSigner::payload_hash(&body);
        let response = self
            .send(method, url, headers, Self::full(body), &payload_hash)
            .await?;
        Self::collect(response).await
    }

    /// Drain a response body so the connection returns to the pool
    pub async fn collect(response: Response<Incoming>) -> Result<Exchange, S3Error> {
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Exchange {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
