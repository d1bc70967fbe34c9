//! Citadel - Embeddable HTTP Server Core
//!
//! Connection acceptance, token-based dispatch, an HTTP/1.1 request/response
//! state machine, and an in-connection upgrade path to WebSocket framing.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod server;
pub mod transport;
pub mod ws;
