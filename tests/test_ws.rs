//! End-to-end websocket tests: handshake, framing, control frames, and
//! scheduled wake-ups, over real TCP connections.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use citadel::config::{Limits, ListenerConfig, ListenerSpec};
use citadel::dispatch::{DispatchRule, DispatchTable, Matcher, Route, Token};
use citadel::http::cycle::Cycle;
use citadel::http::handler::{HandlerOpts, HandlerState, HttpHandler, Init};
use citadel::http::request::Request;
use citadel::server::Server;
use citadel::transport::TcpTransport;
use citadel::ws::session::{Action, CloseReason, Event, Message, WsCtx, WsHandler, WsState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ---- handlers -----------------------------------------------------------

/// Quips back at text messages, echoes wake payloads, records why the
/// session closed.
struct Quip {
    tick: bool,
    closed: Arc<Mutex<Option<CloseReason>>>,
}

#[async_trait]
impl WsHandler for Quip {
    async fn on_open(&self, cx: &mut WsCtx, _req: &mut Request) -> anyhow::Result<WsState> {
        if self.tick {
            cx.schedule(Duration::from_millis(50), b"tick".to_vec());
        }
        Ok(Box::new(()))
    }

    async fn on_event(
        &self,
        _cx: &mut WsCtx,
        event: Event,
        _req: &mut Request,
        _state: &mut WsState,
    ) -> anyhow::Result<Action> {
        Ok(match event {
            // An answer far larger than the socket buffers, so the write
            // stalls and then fails once the peer is gone.
            Event::Message(Message::Text(text)) if text == "flood" => {
                Action::Reply(Message::Binary(vec![0u8; 32 * 1024 * 1024]))
            }
            Event::Message(Message::Text(text)) => {
                Action::Reply(Message::Text(format!("That's what she said! {text}")))
            }
            Event::Message(Message::Binary(bytes)) => Action::Reply(Message::Binary(bytes)),
            Event::Wake(payload) => {
                Action::Reply(Message::Text(String::from_utf8_lossy(&payload).into_owned()))
            }
        })
    }

    async fn on_close(&self, reason: &CloseReason, _req: &mut Request, _state: WsState) {
        *self.closed.lock().unwrap() = Some(reason.clone());
    }
}

/// HTTP handler that upgrades every dispatched request.
struct UpgradeToWs {
    ws: Arc<dyn WsHandler>,
}

#[async_trait]
impl HttpHandler for UpgradeToWs {
    async fn init(&self, _cx: &mut Cycle<'_>, _opts: &HandlerOpts) -> Init {
        Init::Upgrade(Arc::clone(&self.ws))
    }

    async fn handle(&self, _cx: &mut Cycle<'_>, _state: &mut HandlerState) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---- harness ------------------------------------------------------------

async fn start(
    name: &str,
    tick: bool,
) -> (Server, SocketAddr, Arc<Mutex<Option<CloseReason>>>) {
    init_tracing();
    let closed = Arc::new(Mutex::new(None));
    let ws: Arc<dyn WsHandler> = Arc::new(Quip {
        tick,
        closed: Arc::clone(&closed),
    });
    let table = DispatchTable::new(vec![DispatchRule::new(
        Matcher::Any,
        vec![Route::new(
            Matcher::tokens([Token::lit("ws")]),
            Arc::new(UpgradeToWs { ws }),
            HandlerOpts::none(),
        )],
    )]);

    let spec = ListenerSpec {
        name: name.to_string(),
        acceptors: 1,
        bind_addr: "127.0.0.1:0".to_string(),
        idle_timeout_ms: 2_000,
        limits: Limits::default(),
    };
    let cfg = ListenerConfig::from_spec(&spec, table);
    let server = Server::new();
    let addr = server
        .start_listener(cfg, TcpTransport)
        .await
        .expect("listener starts");
    (server, addr, closed)
}

struct WsConn {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl WsConn {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("connect timeout")
            .expect("connect");
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        timeout(IO_TIMEOUT, self.stream.write_all(bytes))
            .await
            .expect("write timeout")
            .expect("write");
    }

    async fn fill(&mut self) -> Result<(), &'static str> {
        let mut tmp = [0u8; 4096];
        let n = timeout(IO_TIMEOUT, self.stream.read(&mut tmp))
            .await
            .map_err(|_| "read timeout")?
            .map_err(|_| "read error")?;
        if n == 0 {
            return Err("eof");
        }
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(())
    }

    async fn at_eof(&mut self) -> bool {
        matches!(self.fill().await, Err("eof"))
    }

    /// Perform the upgrade handshake; returns the raw response head.
    async fn handshake(&mut self, extra_headers: &str) -> String {
        let req = format!(
            "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\n{extra_headers}\r\n"
        );
        self.send(req.as_bytes()).await;

        let head_end = loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            self.fill().await.expect("handshake response");
        };
        let head = String::from_utf8(self.buf[..head_end].to_vec()).expect("utf8 head");
        self.buf.drain(..head_end + 4);
        head
    }

    async fn handshake_ok(&mut self) -> String {
        let head = self
            .handshake(&format!(
                "Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n"
            ))
            .await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols"), "{head}");
        head
    }

    /// Send one masked client frame.
    async fn send_frame(&mut self, opcode: u8, fin: bool, payload: &[u8]) {
        assert!(payload.len() <= 125, "test frames stay small");
        let key = [0x11u8, 0x22, 0x33, 0x44];
        let mut wire = Vec::with_capacity(payload.len() + 6);
        wire.push((if fin { 0x80 } else { 0x00 }) | opcode);
        wire.push(0x80 | payload.len() as u8);
        wire.extend_from_slice(&key);
        for (i, b) in payload.iter().enumerate() {
            wire.push(b ^ key[i % 4]);
        }
        self.send(&wire).await;
    }

    /// Read one unmasked server frame: (opcode, payload).
    async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        loop {
            if self.buf.len() >= 2 {
                let opcode = self.buf[0] & 0x0F;
                assert_eq!(self.buf[1] & 0x80, 0, "server frames are unmasked");
                let (len, header) = match self.buf[1] & 0x7F {
                    126 => {
                        if self.buf.len() < 4 {
                            self.fill().await.expect("frame length");
                            continue;
                        }
                        (u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize, 4)
                    }
                    127 => panic!("unexpected 64-bit frame in tests"),
                    n => (n as usize, 2),
                };
                if self.buf.len() >= header + len {
                    let payload = self.buf[header..header + len].to_vec();
                    self.buf.drain(..header + len);
                    return (opcode, payload);
                }
            }
            self.fill().await.expect("frame bytes");
        }
    }
}

// ---- tests --------------------------------------------------------------

#[tokio::test]
async fn test_handshake_computes_rfc_accept_key() {
    let (_server, addr, _closed) = start("hs", false).await;
    let mut conn = WsConn::connect(addr).await;

    let head = conn.handshake_ok().await;
    assert!(head.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}")));
}

#[tokio::test]
async fn test_text_echo_round_trip() {
    let (_server, addr, _closed) = start("echo", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    conn.send_frame(0x1, true, b"foo").await;
    let (opcode, payload) = conn.read_frame().await;

    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"That's what she said! foo");
}

#[tokio::test]
async fn test_reply_is_exactly_one_text_frame() {
    let (_server, addr, _closed) = start("wire", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    conn.send_frame(0x1, true, b"foo").await;

    // Byte-exact expected frame: FIN|text, 25-byte payload, no mask.
    let expected_payload = b"That's what she said! foo";
    let mut expected = vec![0x81, expected_payload.len() as u8];
    expected.extend_from_slice(expected_payload);

    let mut wire = vec![0u8; expected.len()];
    timeout(IO_TIMEOUT, conn.stream.read_exact(&mut wire))
        .await
        .expect("frame timeout")
        .expect("frame read");
    assert_eq!(wire, expected);
}

#[tokio::test]
async fn test_scheduled_wake_fires_before_any_inbound_frame() {
    let (_server, addr, _closed) = start("tick", true).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    // Send nothing: the wake-up registered in on_open must produce an
    // outbound frame on its own.
    let (opcode, payload) = conn.read_frame().await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"tick");
}

#[tokio::test]
async fn test_fragmented_message_reassembled_before_delivery() {
    let (_server, addr, _closed) = start("frag", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    conn.send_frame(0x1, false, b"fo").await;
    conn.send_frame(0x0, true, b"o").await;

    let (opcode, payload) = conn.read_frame().await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"That's what she said! foo");
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let (_server, addr, _closed) = start("ping", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    conn.send_frame(0x9, true, b"hi").await;
    let (opcode, payload) = conn.read_frame().await;

    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"hi");
}

#[tokio::test]
async fn test_peer_close_echoed_and_reported() {
    let (_server, addr, closed) = start("close", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    let mut payload = 1000u16.to_be_bytes().to_vec();
    payload.extend_from_slice(b"bye");
    conn.send_frame(0x8, true, payload.as_slice()).await;

    let (opcode, echo) = conn.read_frame().await;
    assert_eq!(opcode, 0x8);
    assert_eq!(u16::from_be_bytes([echo[0], echo[1]]), 1000);
    assert!(conn.at_eof().await);

    // on_close saw the peer's code and reason.
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    loop {
        if let Some(reason) = closed.lock().unwrap().clone() {
            assert_eq!(
                reason,
                CloseReason::Peer {
                    code: Some(1000),
                    reason: "bye".to_string()
                }
            );
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "on_close never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_unmasked_client_frame_is_a_protocol_error() {
    let (_server, addr, closed) = start("mask", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    // Unmasked text frame: mask bit clear.
    conn.send(&[0x81, 0x03, b'f', b'o', b'o']).await;

    let (opcode, payload) = conn.read_frame().await;
    assert_eq!(opcode, 0x8);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1002);
    assert!(conn.at_eof().await);

    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while closed.lock().unwrap().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "on_close never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(closed.lock().unwrap().clone(), Some(CloseReason::Protocol));
}

#[tokio::test]
async fn test_on_close_reports_transport_when_reply_write_fails() {
    let (_server, addr, closed) = start("wfail", false).await;
    let mut conn = WsConn::connect(addr).await;
    conn.handshake_ok().await;

    conn.send_frame(0x1, true, b"flood").await;
    // Give the frame time to arrive, then vanish without reading the
    // oversized reply; the stalled write fails once the peer resets.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(conn);

    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    loop {
        if let Some(reason) = closed.lock().unwrap().clone() {
            assert_eq!(reason, CloseReason::Transport);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "on_close never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_handshake_missing_key_rejected_without_upgrade() {
    let (_server, addr, closed) = start("badhs", false).await;
    let mut conn = WsConn::connect(addr).await;

    let head = conn.handshake("Sec-WebSocket-Version: 13\r\n").await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request"), "{head}");

    // Consume the error body, then the server hangs up.
    let content_length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .expect("content length")
        .trim()
        .parse()
        .expect("numeric length");
    while conn.buf.len() < content_length {
        conn.fill().await.expect("error body");
    }
    conn.buf.drain(..content_length);
    assert!(conn.at_eof().await);

    // No framing callback ever ran.
    assert!(closed.lock().unwrap().is_none());
}
