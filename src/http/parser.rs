//! Incremental parsing of the request line and header block.
//!
//! The parser never touches the body; body framing is decided from the
//! parsed headers by `body::BodyState::from_headers` and driven lazily.

use std::collections::HashMap;

use thiserror::Error;

use crate::http::request::{Method, Version};
use crate::http::response::StatusCode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes buffered yet; read more and retry.
    #[error("incomplete request head")]
    Incomplete,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unknown request method")]
    InvalidMethod,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("header block exceeds limit")]
    HeadersTooLarge,
    #[error("declared body exceeds limit")]
    BodyTooLarge,
}

impl ParseError {
    /// Status synthesized for the client when this error aborts a cycle.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::HeadersTooLarge => StatusCode::RequestHeaderFieldsTooLarge,
            ParseError::BodyTooLarge => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Parsed request line and headers, before a Request is assembled.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    /// Keys ASCII-lowercased.
    pub headers: HashMap<String, String>,
}

/// Try to parse a complete request head from the front of `buf`.
///
/// Returns the head and the number of bytes consumed (through the blank
/// line). `ParseError::Incomplete` means the terminator has not arrived yet.
pub fn parse_request_head(buf: &[u8], max_header_bytes: usize) -> Result<(RequestHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(pos) => pos,
        None if buf.len() > max_header_bytes => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > max_header_bytes {
        return Err(ParseError::HeadersTooLarge);
    }

    let head_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequestLine)?;

    let mut lines = head_str.split("\r\n");

    // Request line: METHOD SP TARGET SP VERSION
    let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version_str = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let version = Version::from_str(version_str).ok_or(ParseError::InvalidVersion)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let head = RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
    };

    Ok((head, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
