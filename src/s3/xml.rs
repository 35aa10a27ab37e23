//! XML bodies sent to and received from the S3 API
//!
//! Request bodies are assembled with every piece of caller-controlled text
//! (object keys, ETags) passed through `quick_xml::escape::escape`.
//! Responses are parsed with quick-xml's pull reader using byte-slice tag
//! matching.

use crate::s3::error::{ProviderError, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadResponse, DeleteError, DeleteObjectsResult, UploadedPart,
};
use hyper::StatusCode;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Longest raw body kept as the message of an unparseable error response
const MAX_RAW_MESSAGE: usize = 512;

/// Build the CompleteMultipartUpload manifest.
///
/// Parts are written in ascending part-number order regardless of input order.
pub fn complete_manifest(parts: &[UploadedPart]) -> String {
    let mut ordered: Vec<&UploadedPart> = parts.iter().collect();
    ordered.sort_by_key(|p| p.part_number);

    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str(XML_DECL);
    xml.push_str("<CompleteMultipartUpload>");
    for part in ordered {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        xml.push_str(&escape(part.etag.trim_matches('"')));
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Build the DeleteObjects request body
pub fn delete_body<S: AsRef<str>>(keys: &[S]) -> String {
    let mut xml = String::with_capacity(keys.len() * 60 + 80);
    xml.push_str(XML_DECL);
    xml.push_str("<Delete>");
    for key in keys {
        xml.push_str("<Object><Key>");
        xml.push_str(&escape(key.as_ref()));
        xml.push_str("</Key></Object>");
    }
    xml.push_str("</Delete>");
    xml
}

fn reader(xml_data: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;
    reader
}

/// Parse an `<Error>` document into a `ProviderError`.
///
/// Bodies that are empty or not XML still produce an error carrying the
/// status; a non-XML body becomes the message.
pub fn parse_error(status: StatusCode, xml_data: &[u8]) -> ProviderError {
    let mut error = ProviderError::from_status(status);
    if xml_data.iter().all(|b| b.is_ascii_whitespace()) {
        return error;
    }

    let mut reader = reader(xml_data);
    let mut current_text = String::with_capacity(256);
    let mut saw_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => saw_element = true,
            Ok(Event::Text(e)) => {
                current_text.clear();
                match e.unescape() {
                    Ok(text) => current_text.push_str(&text),
                    Err(_) => break,
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => error.code = std::mem::take(&mut current_text),
                    b"Message" => error.message = std::mem::take(&mut current_text),
                    b"Key" => error.key = Some(std::mem::take(&mut current_text)),
                    b"RequestId" => error.request_id = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    if !saw_element && error.message.is_empty() {
        let raw = String::from_utf8_lossy(xml_data);
        error.message = raw.trim().chars().take(MAX_RAW_MESSAGE).collect();
    }
    error
}

/// Extract the upload ID from an InitiateMultipartUpload response
pub fn parse_initiate_response(xml_data: &[u8]) -> Result<String, S3Error> {
    let mut reader = reader(xml_data);
    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"UploadId" {
                    upload_id = std::mem::take(&mut current_text);
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse(
            "Missing UploadId in response".to_string(),
        ));
    }
    Ok(upload_id)
}

/// Parse a CompleteMultipartUpload response.
///
/// The provider may answer 200 with an `<Error>` document when assembly
/// fails after the response has started; that is returned as an error.
pub fn parse_complete_response(
    status: StatusCode,
    xml_data: &[u8],
) -> Result<CompleteMultipartUploadResponse, S3Error> {
    let mut reader = reader(xml_data);
    let mut response = CompleteMultipartUploadResponse::default();
    let mut current_text = String::with_capacity(256);
    let mut root_seen = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if !root_seen {
                    root_seen = true;
                    if e.local_name().as_ref() == b"Error" {
                        return Err(S3Error::Provider(parse_error(status, xml_data)));
                    }
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => response.location = Some(std::mem::take(&mut current_text)),
                    b"Bucket" => response.bucket = std::mem::take(&mut current_text),
                    b"Key" => response.key = std::mem::take(&mut current_text),
                    b"ETag" => response.etag = current_text.trim_matches('"').to_string(),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse a DeleteObjects response into deleted keys and per-key errors
pub fn parse_delete_response(xml_data: &[u8]) -> Result<DeleteObjectsResult, S3Error> {
    let mut reader = reader(xml_data);
    let mut result = DeleteObjectsResult::default();
    let mut in_deleted = false;
    let mut current_error: Option<DeleteError> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Deleted" => in_deleted = true,
                b"Error" => current_error = Some(DeleteError::default()),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut error) = current_error {
                            error.key = std::mem::take(&mut current_text);
                        } else if in_deleted {
                            result.deleted.push(std::mem::take(&mut current_text));
                        }
                    }
                    b"Code" => {
                        if let Some(ref mut error) = current_error {
                            error.code = std::mem::take(&mut current_text);
                        }
                    }
                    b"Message" => {
                        if let Some(ref mut error) = current_error {
                            error.message = std::mem::take(&mut current_text);
                        }
                    }
                    b"Deleted" => in_deleted = false,
                    b"Error" => {
                        if let Some(error) = current_error.take() {
                            result.errors.push(error);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(result)
}
