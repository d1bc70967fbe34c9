//! Transport abstraction
//!
//! The protocol engines run over a minimal listen/accept/read/write contract
//! so that the same state machine serves plain TCP and, later, encrypted
//! streams. Only the TCP implementation lives here.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Which kind of transport a connection arrived on.
///
/// Handlers receive this tag at initialization so they can vary behaviour
/// (e.g. scheme in generated links) without touching the stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP stream
    Tcp,
    /// Encrypted stream (certificate management is the caller's concern)
    Tls,
}

/// Byte-stream contract for an accepted connection.
///
/// Blanket-implemented for anything tokio can read and write; connection
/// code only ever sees this trait, never a concrete socket type.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Per-listener transport options.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportOptions {
    /// Address to bind, e.g. "127.0.0.1:8080"
    pub bind_addr: String,
}

/// The listen/accept side of a transport.
///
/// `accept` must be safe under concurrent callers sharing one handle;
/// exactly one caller receives each new connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;
    type Stream: Io + 'static;

    fn kind(&self) -> TransportKind;

    async fn listen(&self, opts: &TransportOptions) -> io::Result<Self::Handle>;

    async fn accept(&self, handle: &Self::Handle) -> io::Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self, handle: &Self::Handle) -> io::Result<SocketAddr>;
}

/// Plain TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Handle = TcpListener;
    type Stream = TcpStream;

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn listen(&self, opts: &TransportOptions) -> io::Result<TcpListener> {
        TcpListener::bind(&opts.bind_addr).await
    }

    async fn accept(&self, handle: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = handle.accept().await?;
        // Request/response cycles are small writes; Nagle only adds latency.
        stream.set_nodelay(true).ok();
        Ok((stream, peer))
    }

    fn local_addr(&self, handle: &TcpListener) -> io::Result<SocketAddr> {
        handle.local_addr()
    }
}
