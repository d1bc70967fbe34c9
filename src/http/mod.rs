//! HTTP protocol implementation.
//!
//! A complete HTTP/1.1 server engine with keep-alive support and an upgrade
//! path into websocket framing.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection state machine driving
//!   parse → dispatch → handler → respond → keep-alive-or-close
//! - **`parser`**: incremental request-line and header parsing
//! - **`request`**: the per-cycle request entity
//! - **`response`**: response representation with builder pattern
//! - **`body`**: lazy body framing (content-length and chunked)
//! - **`cycle`**: the handler-facing view of one request cycle, hosting the
//!   reply and body primitives
//! - **`handler`**: the handler calling convention
//! - **`writer`**: response serialization and writing
//!
//! # Connection State Machine
//!
//! ```text
//! AwaitRequestLine → ParseHeaders → Dispatch → HandlerInit
//!        ↑                                        │
//!        │              ┌─────── Upgrade ─────────┤
//!        │              ▼                         ▼
//!        │        ws framing loop          HandlerHandle → Respond
//!        │                                        │
//!        └──────────── keep-alive ────────────────┤
//!                                                 └─ Close
//! ```
//!
//! Malformed input short-circuits to a synthesized client error and `Close`
//! without ever invoking a handler.

pub mod body;
pub mod connection;
pub mod cycle;
pub mod handler;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
