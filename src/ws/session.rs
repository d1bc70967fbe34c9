//! The framing session: handler contract and event loop.
//!
//! After a successful handshake the connection worker runs this loop until
//! the peer closes, the transport fails, or the handler asks to stop.
//! Inbound data frames and scheduled wake-ups are merged into one event
//! stream, so the handler sees both through the same `on_event` callback.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Limits;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::transport::{Io, TransportKind};
use crate::ws::frame::{self, Frame, FrameError, Opcode};
use crate::ws::handshake;

/// A complete (reassembled) data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    fn into_frame(self) -> Frame {
        match self {
            Message::Text(s) => Frame::text(s),
            Message::Binary(b) => Frame::binary(b),
        }
    }
}

/// What `on_event` is invoked with: a decoded inbound message, or a
/// scheduled wake-up the handler registered earlier. The two are shaped
/// alike on purpose; only the tag tells them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    Wake(Vec<u8>),
}

/// What the handler wants done after an event.
pub enum Action {
    /// Encode and send a message, then resume the loop.
    Reply(Message),
    /// Resume the loop without sending.
    Continue,
    /// End the session; a close frame with this code/reason is sent.
    Close { code: u16, reason: String },
}

/// Why the session ended. Passed to `on_close` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame.
    Peer { code: Option<u16>, reason: String },
    /// Transport error or abrupt EOF.
    Transport,
    /// The handler returned `Action::Close`.
    Handler,
    /// The peer violated the framing protocol.
    Protocol,
    /// The handler faulted during `on_event`.
    Fault,
}

/// Handle to a pending scheduled wake-up, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeId(u64);

/// Per-session facility handed to the handler for scheduling wake-ups.
///
/// Wake-ups post into the same channel the event loop reads, so they are
/// delivered interleaved with network frames. Pending wake-ups are
/// discarded when the session ends.
pub struct WsCtx {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
    kind: TransportKind,
}

impl WsCtx {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, kind: TransportKind) -> Self {
        Self {
            tx,
            pending: HashMap::new(),
            next_id: 0,
            kind,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Deliver `payload` as an `Event::Wake` after `delay`.
    pub fn schedule(&mut self, delay: Duration, payload: Vec<u8>) -> WakeId {
        self.pending.retain(|_, handle| !handle.is_finished());

        let id = self.next_id;
        self.next_id += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(payload);
        });
        self.pending.insert(id, handle);
        WakeId(id)
    }

    /// Cancel a pending wake-up. A no-op if it already fired.
    pub fn cancel(&mut self, id: WakeId) {
        if let Some(handle) = self.pending.remove(&id.0) {
            handle.abort();
        }
    }
}

impl Drop for WsCtx {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}

/// Per-session handler state, opaque to the engine.
pub type WsState = Box<dyn Any + Send>;

/// Application callbacks for a framing session.
#[async_trait]
pub trait WsHandler: Send + Sync {
    /// Called once, after the handshake response has been sent.
    async fn on_open(&self, cx: &mut WsCtx, req: &mut Request) -> anyhow::Result<WsState>;

    /// Called for every inbound message and every fired wake-up.
    async fn on_event(
        &self,
        cx: &mut WsCtx,
        event: Event,
        req: &mut Request,
        state: &mut WsState,
    ) -> anyhow::Result<Action>;

    /// Called exactly once when the session ends, for any reason.
    async fn on_close(&self, reason: &CloseReason, req: &mut Request, state: WsState) {
        let _ = (reason, req, state);
    }
}

/// Validate the handshake and, on success, run the framing loop until the
/// session ends. On handshake failure a client error is sent and no
/// framing callback runs; the connection closes either way.
pub(crate) async fn run(
    io: &mut dyn Io,
    buf: &mut BytesMut,
    mut req: Request,
    handler: Arc<dyn WsHandler>,
    kind: TransportKind,
    limits: &Limits,
) -> anyhow::Result<()> {
    let key = match handshake::validate(&req) {
        Ok(key) => key,
        Err(e) => {
            warn!(peer = %req.peer(), error = %e, "websocket handshake rejected");
            ResponseWriter::new(&Response::bad_request(), false)
                .write_to(io)
                .await?;
            return Ok(());
        }
    };

    let accept = handshake::accept_key(&key);
    io.write_all(&handshake::response_bytes(&accept)).await?;
    io.flush().await?;
    info!(peer = %req.peer(), path = %req.path(), "websocket session established");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ctx = WsCtx::new(tx, kind);

    let mut state = match handler.on_open(&mut ctx, &mut req).await {
        Ok(state) => state,
        Err(e) => {
            error!(peer = %req.peer(), error = %e, "websocket on_open failed");
            let _ = send_frame(io, &Frame::close(1011, "")).await;
            return Ok(());
        }
    };

    // Partial message being reassembled: first-frame opcode plus payload.
    let mut fragments: Option<(Opcode, Vec<u8>)> = None;

    let reason = 'session: loop {
        // Drain every complete frame already buffered before reading more.
        loop {
            let (frame, used) = match frame::decode(&buf[..], limits.max_frame_bytes) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %req.peer(), error = %e, "websocket protocol violation");
                    let code = match e {
                        FrameError::TooLarge | FrameError::ControlTooLong => 1009,
                        _ => 1002,
                    };
                    let _ = send_frame(io, &Frame::close(code, "")).await;
                    break 'session CloseReason::Protocol;
                }
            };
            buf.advance(used);

            let message = match frame.opcode {
                Opcode::Ping => {
                    if send_frame(io, &Frame::pong(frame.payload)).await.is_err() {
                        break 'session CloseReason::Transport;
                    }
                    continue;
                }
                Opcode::Pong => continue,
                Opcode::Close => {
                    let (code, text) = parse_close_payload(&frame.payload);
                    let echo = match code {
                        Some(c) => Frame::close(c, ""),
                        None => Frame {
                            fin: true,
                            opcode: Opcode::Close,
                            payload: Vec::new(),
                        },
                    };
                    let _ = send_frame(io, &echo).await;
                    break 'session CloseReason::Peer { code, reason: text };
                }
                Opcode::Text | Opcode::Binary => {
                    if fragments.is_some() {
                        // New data frame in the middle of a fragmented message.
                        let _ = send_frame(io, &Frame::close(1002, "")).await;
                        break 'session CloseReason::Protocol;
                    }
                    if frame.fin {
                        match assemble(frame.opcode, frame.payload) {
                            Ok(msg) => msg,
                            Err(()) => {
                                let _ = send_frame(io, &Frame::close(1007, "")).await;
                                break 'session CloseReason::Protocol;
                            }
                        }
                    } else {
                        fragments = Some((frame.opcode, frame.payload));
                        continue;
                    }
                }
                Opcode::Continuation => {
                    let Some((opcode, mut payload)) = fragments.take() else {
                        let _ = send_frame(io, &Frame::close(1002, "")).await;
                        break 'session CloseReason::Protocol;
                    };
                    payload.extend_from_slice(&frame.payload);
                    if payload.len() > limits.max_frame_bytes {
                        let _ = send_frame(io, &Frame::close(1009, "")).await;
                        break 'session CloseReason::Protocol;
                    }
                    if frame.fin {
                        match assemble(opcode, payload) {
                            Ok(msg) => msg,
                            Err(()) => {
                                let _ = send_frame(io, &Frame::close(1007, "")).await;
                                break 'session CloseReason::Protocol;
                            }
                        }
                    } else {
                        fragments = Some((opcode, payload));
                        continue;
                    }
                }
            };

            if let Some(reason) =
                deliver(io, &handler, &mut ctx, Event::Message(message), &mut req, &mut state)
                    .await
            {
                break 'session reason;
            }
        }

        tokio::select! {
            res = io.read_buf(buf) => match res {
                Ok(0) => break CloseReason::Transport,
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %req.peer(), error = %e, "websocket read failed");
                    break CloseReason::Transport;
                }
            },
            Some(payload) = rx.recv() => {
                if let Some(reason) =
                    deliver(io, &handler, &mut ctx, Event::Wake(payload), &mut req, &mut state)
                        .await
                {
                    break reason;
                }
            }
        }
    };

    info!(peer = %req.peer(), reason = ?reason, "websocket session closed");
    handler.on_close(&reason, &mut req, state).await;
    Ok(())
}

/// Hand one event to the handler and apply its action. Returns the close
/// reason when the session should end; a failed reply write ends it with
/// `Transport` so `on_close` still runs.
async fn deliver(
    io: &mut dyn Io,
    handler: &Arc<dyn WsHandler>,
    ctx: &mut WsCtx,
    event: Event,
    req: &mut Request,
    state: &mut WsState,
) -> Option<CloseReason> {
    match handler.on_event(ctx, event, req, state).await {
        Ok(Action::Reply(msg)) => {
            if let Err(e) = send_frame(io, &msg.into_frame()).await {
                debug!(peer = %req.peer(), error = %e, "websocket write failed");
                return Some(CloseReason::Transport);
            }
            None
        }
        Ok(Action::Continue) => None,
        Ok(Action::Close { code, reason }) => {
            let _ = send_frame(io, &Frame::close(code, &reason)).await;
            Some(CloseReason::Handler)
        }
        Err(e) => {
            error!(peer = %req.peer(), error = %e, "websocket handler fault");
            let _ = send_frame(io, &Frame::close(1011, "")).await;
            Some(CloseReason::Fault)
        }
    }
}

async fn send_frame(io: &mut dyn Io, frame: &Frame) -> anyhow::Result<()> {
    io.write_all(&frame::encode(frame)).await?;
    io.flush().await?;
    Ok(())
}

fn assemble(opcode: Opcode, payload: Vec<u8>) -> Result<Message, ()> {
    match opcode {
        Opcode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| ()),
        _ => Ok(Message::Binary(payload)),
    }
}

fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (Some(code), reason)
}
