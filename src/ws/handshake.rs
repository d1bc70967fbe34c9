//! WebSocket upgrade handshake (RFC 6455 §4).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http::request::Request;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing or invalid {0} header")]
    BadHeader(&'static str),
    #[error("unsupported Sec-WebSocket-Version")]
    BadVersion,
    #[error("malformed Sec-WebSocket-Key")]
    BadKey,
}

/// Validate the upgrade-negotiation headers, returning the client key.
///
/// Requires `Upgrade: websocket`, a `Connection` header carrying the
/// `upgrade` token, `Sec-WebSocket-Version: 13`, and a key that decodes to
/// 16 bytes.
pub fn validate(req: &Request) -> Result<String, HandshakeError> {
    let upgrade = req
        .header("upgrade")
        .ok_or(HandshakeError::BadHeader("Upgrade"))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::BadHeader("Upgrade"));
    }

    let connection = req
        .header("connection")
        .ok_or(HandshakeError::BadHeader("Connection"))?;
    if !connection
        .split(',')
        .any(|tok| tok.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::BadHeader("Connection"));
    }

    match req.header("sec-websocket-version") {
        Some("13") => {}
        _ => return Err(HandshakeError::BadVersion),
    }

    let key = req
        .header("sec-websocket-key")
        .ok_or(HandshakeError::BadHeader("Sec-WebSocket-Key"))?;
    match BASE64.decode(key.trim()) {
        Ok(raw) if raw.len() == 16 => Ok(key.trim().to_string()),
        _ => Err(HandshakeError::BadKey),
    }
}

/// Compute the Sec-WebSocket-Accept value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(WS_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// The complete 101 handshake response for an accepted upgrade.
pub fn response_bytes(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}
