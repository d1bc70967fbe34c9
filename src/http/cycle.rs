//! The handler-facing view of one request cycle.
//!
//! `Cycle` bundles the request with controlled access to the transport, so
//! the reply and body primitives can be enforced in one place: at most one
//! reply per cycle, and body bytes pulled lazily from the stream.

use bytes::BytesMut;
use thiserror::Error;

use crate::config::Limits;
use crate::http::body::{self, BodyError};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::transport::{Io, TransportKind};

#[derive(Debug, Error)]
pub enum ReplyError {
    /// A reply was already sent this cycle. Nothing was written.
    #[error("a reply was already sent for this request cycle")]
    AlreadyReplied,
    #[error("failed to write reply: {0}")]
    Write(#[source] anyhow::Error),
}

pub struct Cycle<'a> {
    pub req: &'a mut Request,
    pub(crate) io: &'a mut dyn Io,
    pub(crate) buf: &'a mut BytesMut,
    pub(crate) kind: TransportKind,
    pub(crate) limits: &'a Limits,
}

impl<'a> Cycle<'a> {
    pub(crate) fn new(
        req: &'a mut Request,
        io: &'a mut dyn Io,
        buf: &'a mut BytesMut,
        kind: TransportKind,
        limits: &'a Limits,
    ) -> Self {
        Self {
            req,
            io,
            buf,
            kind,
            limits,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Send the response for this cycle.
    ///
    /// The response-sent flag transitions false to true at most once; a
    /// second call fails with `AlreadyReplied` and writes nothing.
    pub async fn reply(&mut self, response: Response) -> Result<(), ReplyError> {
        if self.req.replied {
            return Err(ReplyError::AlreadyReplied);
        }

        let head_only = self.req.method == Method::HEAD;
        let mut writer = ResponseWriter::new(&response, head_only);
        writer
            .write_to(&mut *self.io)
            .await
            .map_err(ReplyError::Write)?;

        self.req.replied = true;
        Ok(())
    }

    /// Read the full request body, raw.
    ///
    /// Lazy: bytes are pulled from the stream on first call. A second call
    /// returns an empty vector.
    pub async fn body(&mut self) -> Result<Vec<u8>, BodyError> {
        body::read_to_end(
            &mut *self.io,
            self.buf,
            &mut self.req.body,
            self.limits.max_body_bytes,
        )
        .await
    }

    /// Read the body and parse it as a URL-encoded form.
    pub async fn body_params(&mut self) -> Result<Vec<(String, String)>, BodyError> {
        let raw = self.body().await?;
        Ok(url::form_urlencoded::parse(&raw).into_owned().collect())
    }

    /// Discard whatever body remains so the stream sits at a framing
    /// boundary. Called by the state machine before a keep-alive loop.
    pub(crate) async fn drain_body(&mut self) -> Result<(), BodyError> {
        body::drain(
            &mut *self.io,
            self.buf,
            &mut self.req.body,
            self.limits.max_body_bytes,
        )
        .await
    }
}
