use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::ProtocolOptions;
use crate::http::body::BodyState;
use crate::http::cycle::Cycle;
use crate::http::handler::Init;
use crate::http::parser::{self, ParseError, RequestHead};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::transport::{Io, TransportKind};
use crate::ws;

/// One accepted connection's worker state.
///
/// Exclusively owns its transport stream from accept until close. Runs the
/// request/response state machine, looping on keep-alive, until the client
/// disconnects, an error forces closure, or an upgrade hands the stream to
/// the websocket framing engine.
pub struct Connection<S: Io> {
    io: S,
    peer: SocketAddr,
    local_port: u16,
    kind: TransportKind,
    opts: Arc<ProtocolOptions>,
    buf: BytesMut,
}

/// How one request cycle left the connection.
enum CycleOutcome {
    KeepAlive,
    Close,
    Upgraded,
}

/// Result of waiting for the next request head.
enum HeadOutcome {
    Parsed(RequestHead),
    /// Client went away (EOF); orderly, no response owed.
    Disconnected,
    /// Idle timeout waiting for a request line; close without a response.
    TimedOut,
    Malformed(ParseError),
}

impl<S: Io> Connection<S> {
    pub fn new(
        io: S,
        peer: SocketAddr,
        local_port: u16,
        kind: TransportKind,
        opts: Arc<ProtocolOptions>,
    ) -> Self {
        Self {
            io,
            peer,
            local_port,
            kind,
            opts,
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            match self.cycle().await? {
                CycleOutcome::KeepAlive => continue,
                CycleOutcome::Close | CycleOutcome::Upgraded => break,
            }
        }
        Ok(())
    }

    /// Drive one full request cycle:
    /// AwaitRequestLine → ParseHeaders → Dispatch → HandlerInit →
    /// HandlerHandle → Respond → KeepAlive | Close, or divert to framing.
    async fn cycle(&mut self) -> anyhow::Result<CycleOutcome> {
        let opts = Arc::clone(&self.opts);

        let head = match self.read_head().await? {
            HeadOutcome::Parsed(head) => head,
            HeadOutcome::Disconnected | HeadOutcome::TimedOut => {
                return Ok(CycleOutcome::Close);
            }
            HeadOutcome::Malformed(e) => {
                warn!(peer = %self.peer, error = %e, "malformed request");
                return self.abort(e.status()).await;
            }
        };

        let body = match BodyState::from_headers(&head.headers, opts.limits.max_body_bytes) {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "unacceptable body framing");
                return self.abort(e.status()).await;
            }
        };

        let mut req = Request::new(
            head.method,
            head.version,
            self.peer,
            self.local_port,
            &head.target,
            head.headers,
            body,
        );

        let Some(matched) = opts.table.matching(req.host(), req.path()) else {
            debug!(peer = %self.peer, path = %req.path(), "no dispatch rule matched");
            let mut cx = Cycle::new(&mut req, &mut self.io, &mut self.buf, self.kind, &opts.limits);
            cx.reply(Response::not_found()).await?;
            let keep_alive = req.keep_alive();
            return self.finish_cycle(&mut req, keep_alive).await;
        };
        req.bindings = matched.bindings;

        let init = {
            let mut cx = Cycle::new(&mut req, &mut self.io, &mut self.buf, self.kind, &opts.limits);
            matched.handler.init(&mut cx, &matched.opts).await
        };

        let mut state = match init {
            Init::Continue(state) => state,
            Init::Upgrade(ws_handler) => {
                ws::session::run(
                    &mut self.io,
                    &mut self.buf,
                    req,
                    ws_handler,
                    self.kind,
                    &opts.limits,
                )
                .await?;
                return Ok(CycleOutcome::Upgraded);
            }
            Init::Fault(e) => {
                error!(peer = %self.peer, error = %e, "handler init fault");
                let mut cx =
                    Cycle::new(&mut req, &mut self.io, &mut self.buf, self.kind, &opts.limits);
                if !cx.req.replied() {
                    cx.reply(Response::internal_error()).await?;
                }
                return Ok(CycleOutcome::Close);
            }
        };

        let (handled, reply_failed) = {
            let mut cx = Cycle::new(&mut req, &mut self.io, &mut self.buf, self.kind, &opts.limits);

            let handled = matched.handler.handle(&mut cx, &mut state).await;

            // Respond: a cycle that reached the handler always answers.
            // Write failures are held back so terminate still runs.
            let mut reply_failed = None;
            match &handled {
                Ok(()) => {
                    if !cx.req.replied() {
                        reply_failed = cx.reply(Response::no_content()).await.err();
                    }
                }
                Err(e) => {
                    error!(peer = %cx.req.peer(), error = %e, "handler fault");
                    if !cx.req.replied() {
                        reply_failed = cx.reply(Response::internal_error()).await.err();
                    }
                }
            }

            matched.handler.terminate(&mut cx, state).await;
            (handled, reply_failed)
        };

        if let Some(e) = reply_failed {
            debug!(peer = %self.peer, error = %e, "reply write failed");
            return Ok(CycleOutcome::Close);
        }
        if handled.is_err() {
            return Ok(CycleOutcome::Close);
        }

        let keep_alive = req.keep_alive();
        self.finish_cycle(&mut req, keep_alive).await
    }

    /// Wait for and parse the next request head, bounded by the idle
    /// timeout. Consumes the head bytes from the connection buffer.
    async fn read_head(&mut self) -> anyhow::Result<HeadOutcome> {
        let idle = self.opts.idle_timeout;
        let max_header_bytes = self.opts.limits.max_header_bytes;
        let io = &mut self.io;
        let buf = &mut self.buf;

        let wait = async move {
            loop {
                match parser::parse_request_head(&buf[..], max_header_bytes) {
                    Ok((head, consumed)) => {
                        buf.advance(consumed);
                        return Ok(HeadOutcome::Parsed(head));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Ok(HeadOutcome::Malformed(e)),
                }

                let n = io.read_buf(buf).await?;
                if n == 0 {
                    return Ok::<_, anyhow::Error>(HeadOutcome::Disconnected);
                }
            }
        };

        match timeout(idle, wait).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(HeadOutcome::TimedOut),
        }
    }

    /// Synthesize an error response and close; the handler never ran.
    async fn abort(&mut self, status: StatusCode) -> anyhow::Result<CycleOutcome> {
        let resp = Response::for_status(status);
        let mut writer = ResponseWriter::new(&resp, false);
        writer.write_to(&mut self.io).await?;
        Ok(CycleOutcome::Close)
    }

    /// End a cycle that produced a response: drain what the handler left
    /// unread, then loop or close.
    async fn finish_cycle(
        &mut self,
        req: &mut Request,
        keep_alive: bool,
    ) -> anyhow::Result<CycleOutcome> {
        if !req.body.is_consumed() {
            let mut cx = Cycle::new(req, &mut self.io, &mut self.buf, self.kind, &self.opts.limits);
            if let Err(e) = cx.drain_body().await {
                debug!(peer = %self.peer, error = %e, "failed draining unread body");
                return Ok(CycleOutcome::Close);
            }
        }

        if keep_alive && req.replied() {
            Ok(CycleOutcome::KeepAlive)
        } else {
            Ok(CycleOutcome::Close)
        }
    }
}
