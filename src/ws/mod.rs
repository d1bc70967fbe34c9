//! WebSocket upgrade and framing.
//!
//! Entered only through the HTTP state machine: when a handler's `init`
//! returns `Upgrade`, the connection validates the handshake, answers with
//! `101 Switching Protocols`, and runs the framing session loop for the
//! rest of the connection's life.
//!
//! - **`handshake`**: RFC 6455 header validation and accept-key response
//! - **`frame`**: frame decode (client-masked) and encode (server, unmasked)
//! - **`session`**: the event loop, handler contract, fragmentation
//!   reassembly, control-frame handling, and scheduled wake-ups

pub mod frame;
pub mod handshake;
pub mod session;
