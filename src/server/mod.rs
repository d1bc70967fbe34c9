//! Listener lifecycle: acceptor pool, connection workers, and the
//! fault-isolation hierarchy that owns them.

pub mod listener;

pub use listener::{ListenerError, ListenerStatus, Server};
