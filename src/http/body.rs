//! Lazy request-body framing.
//!
//! The body is never read eagerly: the connection buffer may already hold
//! part of it, and the rest is pulled from the stream only when a handler
//! asks (or when the machine drains an unread body before the next
//! keep-alive cycle). Both content-length and chunked framing are driven
//! from the same `BodyState` kept on the Request.

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::http::parser::ParseError;
use crate::transport::Io;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("i/o error reading body: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed mid-body")]
    UnexpectedEof,
    #[error("malformed chunked framing")]
    InvalidChunk,
    #[error("body exceeds limit")]
    TooLarge,
}

/// Where this request's body stands on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// No body declared.
    None,
    /// Content-Length framing; `remaining` bytes still on the wire or in
    /// the connection buffer.
    Sized { remaining: usize },
    /// Chunked transfer framing.
    Chunked(ChunkPhase),
    /// Fully read (or drained).
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    /// Expecting a chunk-size line.
    Size,
    /// Inside chunk data.
    Data { remaining: usize },
    /// Expecting the CRLF that closes a chunk.
    DataEnd,
    /// Expecting trailer lines through the final blank line.
    Trailer,
}

impl BodyState {
    /// Decide body framing from the parsed headers.
    ///
    /// Transfer-Encoding wins over Content-Length, per HTTP/1.1 framing.
    pub fn from_headers(
        headers: &HashMap<String, String>,
        max_body_bytes: usize,
    ) -> Result<Self, ParseError> {
        if let Some(te) = headers.get("transfer-encoding") {
            if te
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(BodyState::Chunked(ChunkPhase::Size));
            }
        }

        match headers.get("content-length") {
            Some(v) => {
                let len: usize = v.parse().map_err(|_| ParseError::InvalidContentLength)?;
                if len > max_body_bytes {
                    return Err(ParseError::BodyTooLarge);
                }
                if len == 0 {
                    Ok(BodyState::None)
                } else {
                    Ok(BodyState::Sized { remaining: len })
                }
            }
            None => Ok(BodyState::None),
        }
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, BodyState::None | BodyState::Consumed)
    }
}

/// Read the whole remaining body, consuming it from buffer and stream.
///
/// Returns the body bytes; a second call after consumption yields an empty
/// vector. On error the body state is left mid-stream and the connection
/// must close rather than loop.
pub async fn read_to_end(
    io: &mut dyn Io,
    buf: &mut BytesMut,
    state: &mut BodyState,
    max_body_bytes: usize,
) -> Result<Vec<u8>, BodyError> {
    let mut out = Vec::new();

    loop {
        match *state {
            BodyState::None | BodyState::Consumed => {
                *state = BodyState::Consumed;
                return Ok(out);
            }

            BodyState::Sized { remaining } => {
                if buf.is_empty() {
                    fill(io, buf).await?;
                }
                let take = remaining.min(buf.len());
                out.extend_from_slice(&buf[..take]);
                buf.advance(take);
                if take == remaining {
                    *state = BodyState::Consumed;
                } else {
                    *state = BodyState::Sized {
                        remaining: remaining - take,
                    };
                }
            }

            BodyState::Chunked(phase) => {
                match phase {
                    ChunkPhase::Size => {
                        let Some(line) = take_line(buf) else {
                            fill(io, buf).await?;
                            continue;
                        };
                        // Chunk extensions after ';' are ignored.
                        let size_str = line.split(';').next().unwrap_or("").trim();
                        let size = usize::from_str_radix(size_str, 16)
                            .map_err(|_| BodyError::InvalidChunk)?;
                        if size == 0 {
                            *state = BodyState::Chunked(ChunkPhase::Trailer);
                        } else if out.len() + size > max_body_bytes {
                            return Err(BodyError::TooLarge);
                        } else {
                            *state = BodyState::Chunked(ChunkPhase::Data { remaining: size });
                        }
                    }

                    ChunkPhase::Data { remaining } => {
                        if buf.is_empty() {
                            fill(io, buf).await?;
                        }
                        let take = remaining.min(buf.len());
                        out.extend_from_slice(&buf[..take]);
                        buf.advance(take);
                        if take == remaining {
                            *state = BodyState::Chunked(ChunkPhase::DataEnd);
                        } else {
                            *state = BodyState::Chunked(ChunkPhase::Data {
                                remaining: remaining - take,
                            });
                        }
                    }

                    ChunkPhase::DataEnd => {
                        while buf.len() < 2 {
                            fill(io, buf).await?;
                        }
                        if &buf[..2] != b"\r\n" {
                            return Err(BodyError::InvalidChunk);
                        }
                        buf.advance(2);
                        *state = BodyState::Chunked(ChunkPhase::Size);
                    }

                    ChunkPhase::Trailer => {
                        let Some(line) = take_line(buf) else {
                            fill(io, buf).await?;
                            continue;
                        };
                        if line.is_empty() {
                            *state = BodyState::Consumed;
                        }
                    }
                }
            }
        }
    }
}

/// Read and discard whatever the handler left unread, so the next cycle
/// starts at a framing boundary.
pub async fn drain(
    io: &mut dyn Io,
    buf: &mut BytesMut,
    state: &mut BodyState,
    max_body_bytes: usize,
) -> Result<(), BodyError> {
    read_to_end(io, buf, state, max_body_bytes).await.map(|_| ())
}

/// Pull more bytes from the stream into the connection buffer.
async fn fill(io: &mut dyn Io, buf: &mut BytesMut) -> Result<(), BodyError> {
    let n = io.read_buf(buf).await?;
    if n == 0 {
        return Err(BodyError::UnexpectedEof);
    }
    Ok(())
}

/// Take one CRLF-terminated line off the front of the buffer, if complete.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = buf.split_to(pos);
    buf.advance(2);
    Some(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sized_body_from_content_length() {
        let h = headers(&[("content-length", "12")]);
        assert_eq!(
            BodyState::from_headers(&h, 1024).unwrap(),
            BodyState::Sized { remaining: 12 }
        );
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let h = headers(&[("transfer-encoding", "chunked"), ("content-length", "5")]);
        assert_eq!(
            BodyState::from_headers(&h, 1024).unwrap(),
            BodyState::Chunked(ChunkPhase::Size)
        );
    }

    #[test]
    fn oversized_declaration_rejected() {
        let h = headers(&[("content-length", "2048")]);
        assert!(BodyState::from_headers(&h, 1024).is_err());
    }
}
