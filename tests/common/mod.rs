//! In-process fake S3 endpoint for integration tests
//!
//! Path-style, single bucket, HTTP/1.1. Checks that every request carries
//! a SigV4 authorization header, that hashed payloads match their body and
//! that batch deletes carry a correct Content-MD5. Part uploads,
//! completions and aborts can be made to fail on demand.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha2::{Digest, Sha256};
use stashd::StorageConfig;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const BUCKET: &str = "test-bucket";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct PendingUpload {
    pub key: String,
    pub content_type: String,
    pub parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub key: Option<String>,
    pub query: String,
}

impl RecordedRequest {
    pub fn has_param(&self, name: &str) -> bool {
        self.query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(name))
    }
}

#[derive(Debug, Default)]
pub struct State {
    pub objects: HashMap<String, StoredObject>,
    pub uploads: HashMap<String, PendingUpload>,
    pub requests: Vec<RecordedRequest>,
    pub aborted: Vec<String>,
    /// Part number whose upload answers 500
    pub fail_part: Option<u32>,
    /// Abort requests answer 503
    pub fail_abort: bool,
    /// Status of a failing completion; 200 sends an `<Error>` body
    pub fail_complete: Option<StatusCode>,
    /// Keys a batch delete reports as AccessDenied
    pub protected: Vec<String>,
    next_upload: u64,
}

pub struct FakeS3 {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<State>>,
    handle: JoinHandle<()>,
}

impl Drop for FakeS3 {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeS3 {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => continue,
                };

                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(handle_request(&state, req).await) }
                    });
                    let _ = http1::Builder::new()
                        .keep_alive(true)
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> StorageConfig {
        StorageConfig::new(BUCKET, "AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
            .with_endpoint(self.endpoint())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn put_object(&self, key: &str, data: &[u8]) {
        self.state.lock().unwrap().objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn fail_part(&self, part_number: u32) {
        self.state.lock().unwrap().fail_part = Some(part_number);
    }

    pub fn fail_abort(&self) {
        self.state.lock().unwrap().fail_abort = true;
    }

    pub fn fail_complete(&self, status: StatusCode) {
        self.state.lock().unwrap().fail_complete = Some(status);
    }

    pub fn protect(&self, key: &str) {
        self.state.lock().unwrap().protected.push(key.to_string());
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }
}

/// Deterministic pseudo-random bytes
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        out.extend_from_slice(&x.to_le_bytes());
    }
    out.truncate(len);
    out
}

type Reply = Response<Full<Bytes>>;

fn reply(status: StatusCode, body: impl Into<Bytes>) -> Reply {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn xml_reply(status: StatusCode, body: String) -> Reply {
    let mut response = reply(status, body);
    response
        .headers_mut()
        .insert("content-type", "application/xml".parse().unwrap());
    response
}

fn error_reply(status: StatusCode, code: &str, message: &str, key: Option<&str>) -> Reply {
    let key = key
        .map(|k| format!("<Key>{}</Key>", quick_xml::escape::escape(k)))
        .unwrap_or_default();
    xml_reply(
        status,
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>{}</Code><Message>{}</Message>{}<RequestId>fake-req</RequestId></Error>",
            code, message, key
        ),
    )
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_default();
            (decode(k), decode(v))
        })
        .collect()
}

/// Text of every `<tag>...</tag>` in `xml`, unescaped
fn tag_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else { break };
        let raw = &after[..end];
        values.push(
            quick_xml::escape::unescape(raw)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| raw.to_string()),
        );
        rest = &after[end + close.len()..];
    }
    values
}

async fn handle_request(state: &Mutex<State>, req: Request<Incoming>) -> Reply {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return error_reply(StatusCode::BAD_REQUEST, "IncompleteBody", "body", None),
    };

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();
    let raw_key = path
        .trim_start_matches('/')
        .strip_prefix(BUCKET)
        .map(|rest| rest.trim_start_matches('/'));
    let key = match raw_key {
        Some("") => None,
        Some(encoded) => match urlencoding::decode(encoded) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => return error_reply(StatusCode::BAD_REQUEST, "InvalidURI", "bad key", None),
        },
        None => {
            return error_reply(StatusCode::NOT_FOUND, "NoSuchBucket", "no such bucket", None)
        }
    };

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: parts.method.clone(),
        key: key.clone(),
        query: query.clone(),
    });

    match header(&parts.headers, "authorization") {
        Some(auth) if auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/") => {}
        _ => return error_reply(StatusCode::FORBIDDEN, "AccessDenied", "missing signature", None),
    }
    match header(&parts.headers, "x-amz-content-sha256") {
        Some("UNSIGNED-PAYLOAD") => {}
        Some(hash) if hash == hex::encode(Sha256::digest(&body)) => {}
        _ => {
            return error_reply(
                StatusCode::BAD_REQUEST,
                "XAmzContentSHA256Mismatch",
                "payload hash mismatch",
                None,
            )
        }
    }

    let params = query_params(&query);
    match key {
        None => bucket_request(&mut state, &parts.method, &parts.headers, &params, &body),
        Some(key) => object_request(&mut state, &parts.method, &parts.headers, &params, &key, body),
    }
}

fn bucket_request(
    state: &mut State,
    method: &Method,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    body: &Bytes,
) -> Reply {
    match *method {
        Method::HEAD => reply(StatusCode::OK, Bytes::new()),
        Method::POST if params.contains_key("delete") => {
            let expected = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &md5::compute(body)[..],
            );
            if header(headers, "content-md5") != Some(expected.as_str()) {
                return error_reply(StatusCode::BAD_REQUEST, "BadDigest", "md5 mismatch", None);
            }

            let text = String::from_utf8_lossy(body).into_owned();
            let mut result = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><DeleteResult>");
            for key in tag_values(&text, "Key") {
                let escaped = quick_xml::escape::escape(key.as_str()).into_owned();
                if state.protected.contains(&key) {
                    result.push_str(&format!(
                        "<Error><Key>{}</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
                        escaped
                    ));
                } else if state.objects.remove(&key).is_some() {
                    result.push_str(&format!("<Deleted><Key>{}</Key></Deleted>", escaped));
                } else {
                    result.push_str(&format!(
                        "<Error><Key>{}</Key><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
                        escaped
                    ));
                }
            }
            result.push_str("</DeleteResult>");
            xml_reply(StatusCode::OK, result)
        }
        _ => error_reply(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "bucket", None),
    }
}

fn object_request(
    state: &mut State,
    method: &Method,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    key: &str,
    body: Bytes,
) -> Reply {
    let not_found = || {
        error_reply(
            StatusCode::NOT_FOUND,
            "NoSuchKey",
            "The specified key does not exist.",
            Some(key),
        )
    };

    match *method {
        Method::POST if params.contains_key("uploads") => {
            state.next_upload += 1;
            let upload_id = format!("upload-{}/{}", state.next_upload, key.len());
            state.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    content_type: header(headers, "content-type")
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                    parts: BTreeMap::new(),
                },
            );
            xml_reply(
                StatusCode::OK,
                format!(
                    "<InitiateMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                    BUCKET,
                    quick_xml::escape::escape(key),
                    quick_xml::escape::escape(upload_id.as_str())
                ),
            )
        }
        Method::PUT if params.contains_key("partNumber") => {
            let part_number: u32 = params["partNumber"].parse().unwrap_or(0);
            let upload_id = params.get("uploadId").cloned().unwrap_or_default();
            if state.fail_part == Some(part_number) {
                return error_reply(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "injected", None);
            }
            let etag = etag_of(&body);
            let Some(upload) = state.uploads.get_mut(&upload_id) else {
                return error_reply(StatusCode::NOT_FOUND, "NoSuchUpload", "no such upload", None);
            };
            upload.parts.insert(part_number, body);
            let mut response = reply(StatusCode::OK, Bytes::new());
            response.headers_mut().insert("etag", etag.parse().unwrap());
            response
        }
        Method::POST if params.contains_key("uploadId") => {
            let upload_id = &params["uploadId"];
            if let Some(status) = state.fail_complete {
                return error_reply(status, "InternalError", "injected", Some(key));
            }
            let Some(upload) = state.uploads.remove(upload_id) else {
                return error_reply(StatusCode::NOT_FOUND, "NoSuchUpload", "no such upload", None);
            };

            let manifest = String::from_utf8_lossy(&body).into_owned();
            let numbers: Vec<u32> = tag_values(&manifest, "PartNumber")
                .iter()
                .filter_map(|n| n.parse().ok())
                .collect();
            let etags = tag_values(&manifest, "ETag");
            let expected: Vec<u32> = (1..=upload.parts.len() as u32).collect();
            let etags_match = upload
                .parts
                .values()
                .zip(&etags)
                .all(|(data, etag)| &etag_of(data) == etag);
            if numbers != expected || etags.len() != numbers.len() || !etags_match {
                return error_reply(StatusCode::BAD_REQUEST, "InvalidPart", "bad manifest", None);
            }

            let mut data = Vec::new();
            for part in upload.parts.values() {
                data.extend_from_slice(part);
            }
            let etag = format!("\"{:x}-{}\"", md5::compute(&data), upload.parts.len());
            state.objects.insert(
                upload.key.clone(),
                StoredObject {
                    data: Bytes::from(data),
                    content_type: upload.content_type,
                },
            );
            xml_reply(
                StatusCode::OK,
                format!(
                    "<CompleteMultipartUploadResult><Location>http://fake/{}/{}</Location><Bucket>{}</Bucket><Key>{}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
                    BUCKET,
                    quick_xml::escape::escape(key),
                    BUCKET,
                    quick_xml::escape::escape(key),
                    quick_xml::escape::escape(etag.as_str())
                ),
            )
        }
        Method::DELETE if params.contains_key("uploadId") => {
            let upload_id = params["uploadId"].clone();
            if state.fail_abort {
                return error_reply(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ServiceUnavailable",
                    "injected",
                    None,
                );
            }
            if state.uploads.remove(&upload_id).is_none() {
                return error_reply(StatusCode::NOT_FOUND, "NoSuchUpload", "no such upload", None);
            }
            state.aborted.push(upload_id);
            reply(StatusCode::NO_CONTENT, Bytes::new())
        }
        Method::PUT => {
            let content_type = header(headers, "content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            let etag = etag_of(&body);
            state.objects.insert(
                key.to_string(),
                StoredObject {
                    data: body,
                    content_type,
                },
            );
            let mut response = reply(StatusCode::OK, Bytes::new());
            response.headers_mut().insert("etag", etag.parse().unwrap());
            response
        }
        Method::GET => match state.objects.get(key) {
            Some(object) => {
                let mut response = reply(StatusCode::OK, object.data.clone());
                response
                    .headers_mut()
                    .insert("content-type", object.content_type.parse().unwrap());
                response
            }
            None => not_found(),
        },
        Method::HEAD => match state.objects.get(key) {
            Some(object) => {
                let mut response = reply(StatusCode::OK, Bytes::new());
                let headers = response.headers_mut();
                headers.insert("content-length", object.data.len().into());
                headers.insert("content-type", object.content_type.parse().unwrap());
                headers.insert("etag", etag_of(&object.data).parse().unwrap());
                headers.insert(
                    "last-modified",
                    "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
                );
                response
            }
            None => reply(StatusCode::NOT_FOUND, Bytes::new()),
        },
        Method::DELETE => match state.objects.remove(key) {
            Some(_) => reply(StatusCode::NO_CONTENT, Bytes::new()),
            None => not_found(),
        },
        _ => error_reply(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "object", None),
    }
}
