//! AWS Signature Version 4 signer for S3 requests
//!
//! The signer holds credentials only; the signing time is always passed in,
//! so the same inputs produce the same signature and the whole algorithm is
//! testable without a network or a clock.
//!
//! Only `host`, `content-type` and `x-amz-*` headers take part in the
//! signature. Anything else the transport adds (content-length,
//! user-agent, content-md5) can change without invalidating it.

use crate::s3::error::S3Error;
use crate::s3::types::{Credentials, DEFAULT_CONTENT_TYPE};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Uri};
use sha2::{Digest, Sha256};
use std::fmt::Write as FmtWrite;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload hash for bodies that are streamed rather than hashed
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// AWS Signature Version 4 signer
#[derive(Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    /// Pre-computed "AWS4" + secret_key
    aws4_key: Vec<u8>,
}

// aws4_key embeds the secret
impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        let aws4_key = format!("AWS4{}", credentials.secret_key).into_bytes();
        Self {
            credentials,
            aws4_key,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Hex SHA256 of a payload, using the constant for empty bodies
    pub fn payload_hash(payload: &[u8]) -> String {
        if payload.is_empty() {
            EMPTY_SHA256.to_string()
        } else {
            hex::encode(Sha256::digest(payload))
        }
    }

    /// Sign a request in place with header-based SigV4.
    ///
    /// Adds `host`, `x-amz-date`, `x-amz-content-sha256`, a default
    /// `content-type` when none is set, and `authorization`.
    pub fn sign<B>(
        &self,
        req: &mut Request<B>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), S3Error> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let host = Self::host_header(req.uri())?;

        let headers = req.headers_mut();
        headers.insert(HOST, HeaderValue::from_str(&host)?);
        headers.insert(X_AMZ_DATE, HeaderValue::from_str(&amz_date)?);
        headers.insert(X_AMZ_CONTENT_SHA256, HeaderValue::from_str(payload_hash)?);
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }

        let (canonical_headers, signed_headers) = Self::canonical_headers(req.headers());
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            req.method().as_str(),
            Self::canonical_uri(req.uri()),
            Self::canonical_query_string(req.uri().query().unwrap_or("")),
            canonical_headers,
            signed_headers,
            payload_hash
        );
        tracing::trace!(canonical_request = %canonical_request, "sigv4 canonical request");

        let credential_scope = self.credential_scope(&date_stamp);
        let signature = self.signature(&date_stamp, &amz_date, &credential_scope, &canonical_request);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key, credential_scope, signed_headers, signature
        );
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);

        Ok(())
    }

    /// Build a presigned URL granting `method` on `url` for `expires_in`.
    ///
    /// Only `host` is signed and the payload is `UNSIGNED-PAYLOAD`, so the
    /// URL works from any HTTP client without further headers.
    pub fn presign_url(
        &self,
        method: &Method,
        url: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, S3Error> {
        let uri: Uri = url.parse().map_err(hyper::http::Error::from)?;
        let host = Self::host_header(&uri)?;
        let scheme = uri.scheme_str().unwrap_or("https");
        let authority = uri
            .authority()
            .map(|a| a.as_str())
            .ok_or_else(|| S3Error::InvalidRequest(format!("URL has no host: {}", url)))?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let credential_scope = self.credential_scope(&date_stamp);

        // Raw values; canonicalization below encodes them
        let mut query = uri.query().unwrap_or("").to_string();
        if !query.is_empty() {
            query.push('&');
        }
        let _ = write!(
            query,
            "X-Amz-Algorithm={}&X-Amz-Credential={}/{}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            ALGORITHM,
            self.credentials.access_key,
            credential_scope,
            amz_date,
            expires_in.as_secs()
        );
        let canonical_query = Self::canonical_query_string(&query);
        let canonical_uri = Self::canonical_uri(&uri);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method.as_str(),
            canonical_uri,
            canonical_query,
            host,
            UNSIGNED_PAYLOAD
        );
        tracing::trace!(canonical_request = %canonical_request, "sigv4 presign canonical request");

        let signature = self.signature(&date_stamp, &amz_date, &credential_scope, &canonical_request);

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            scheme, authority, canonical_uri, canonical_query, signature
        ))
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.credentials.region, SERVICE
        )
    }

    /// Hash the canonical request into the string to sign and sign it
    fn signature(
        &self,
        date_stamp: &str,
        amz_date: &str,
        credential_scope: &str,
        canonical_request: &str,
    ) -> String {
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, amz_date, credential_scope, canonical_request_hash
        );
        let signing_key = self.derive_signing_key(date_stamp);
        hex::encode(Self::hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// Derive signing key from date stamp (4 chained HMAC operations)
    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_date = Self::hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
        let k_region = Self::hmac_sha256(&k_date, self.credentials.region.as_bytes());
        let k_service = Self::hmac_sha256(&k_region, SERVICE.as_bytes());
        Self::hmac_sha256(&k_service, b"aws4_request")
    }

    /// HMAC-SHA256 returning fixed-size array (no heap allocation)
    fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        let result = mac.finalize().into_bytes();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    /// Host header value: URI authority with the scheme's default port stripped
    fn host_header(uri: &Uri) -> Result<String, S3Error> {
        let authority = uri
            .authority()
            .ok_or_else(|| S3Error::InvalidRequest(format!("URL has no host: {}", uri)))?;
        let default_port = match uri.scheme_str() {
            Some("http") => 80,
            _ => 443,
        };
        Ok(match authority.port_u16() {
            Some(port) if port == default_port => authority.host().to_string(),
            _ => authority.as_str().to_string(),
        })
    }

    /// Canonical URI: the request path, already encoded by the caller
    fn canonical_uri(uri: &Uri) -> &str {
        match uri.path() {
            "" => "/",
            path => path,
        }
    }

    fn is_signed_header(name: &str) -> bool {
        name == "host" || name == "content-type" || name.starts_with("x-amz-")
    }

    /// Canonical header block and signed header list.
    ///
    /// `HeaderMap` names are already lowercase; values are trimmed and
    /// repeated headers are joined with commas.
    fn canonical_headers(headers: &HeaderMap) -> (String, String) {
        let mut names: Vec<&str> = headers
            .keys()
            .map(|name| name.as_str())
            .filter(|name| Self::is_signed_header(name))
            .collect();
        names.sort_unstable();

        let mut canonical = String::with_capacity(names.len() * 64);
        for name in &names {
            canonical.push_str(name);
            canonical.push(':');
            let mut first = true;
            for value in headers.get_all(*name) {
                if !first {
                    canonical.push(',');
                }
                canonical.push_str(String::from_utf8_lossy(value.as_bytes()).trim());
                first = false;
            }
            canonical.push('\n');
        }

        (canonical, names.join(";"))
    }

    /// Create canonical query string (sorted by parameter name)
    ///
    /// Fast path: if all characters are already in canonical form, parameters
    /// are sorted, and all params have `=`, returns as-is. Otherwise every
    /// pair is decoded, re-encoded per RFC 3986 and sorted; valueless
    /// parameters such as `uploads` become `uploads=`.
    fn canonical_query_string(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let all_canonical = query.bytes().all(|b| {
            matches!(b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
                | b'-' | b'_' | b'.' | b'~'
                | b'=' | b'&' | b'%')
        });

        if all_canonical {
            let mut sorted = true;
            let mut all_have_equals = true;
            let mut last_key: &str = "";
            for pair in query.split('&') {
                let key = match pair.find('=') {
                    Some(pos) => &pair[..pos],
                    None => {
                        all_have_equals = false;
                        pair
                    }
                };
                if key < last_key {
                    sorted = false;
                    break;
                }
                last_key = key;
            }
            if sorted && all_have_equals {
                return query.to_string();
            }
        }

        let mut params: Vec<(String, String)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
                let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
                (Self::uri_encode(&key, true), Self::uri_encode(&value, true))
            })
            .collect();

        params.sort_unstable();

        let mut result = String::with_capacity(query.len() + 32);
        for (i, (k, v)) in params.iter().enumerate() {
            if i > 0 {
                result.push('&');
            }
            result.push_str(k);
            result.push('=');
            result.push_str(v);
        }
        result
    }

    /// URI encode a string (RFC 3986) using hex lookup table
    pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(byte as char);
                }
                b'/' if !encode_slash => {
                    result.push('/');
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        result
    }
}
