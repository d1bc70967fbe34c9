//! The handler calling convention.
//!
//! Handlers are registered in the dispatch table as trait objects, carry
//! opaque per-table options, and thread opaque state through the cycle; the
//! core never inspects either. `init` may divert the connection into a
//! websocket framing session instead of continuing the HTTP cycle.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::http::cycle::Cycle;
use crate::ws::session::WsHandler;

/// Options attached to a dispatch-table entry, opaque to the core.
///
/// Handlers downcast to whatever concrete type they registered.
#[derive(Clone)]
pub struct HandlerOpts(Arc<dyn Any + Send + Sync>);

impl HandlerOpts {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn none() -> Self {
        Self(Arc::new(()))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

/// Per-cycle handler state, owned by the handler and never inspected here.
pub type HandlerState = Box<dyn Any + Send>;

/// Outcome of `HttpHandler::init`.
pub enum Init {
    /// Proceed with the HTTP cycle; `handle` and `terminate` will run.
    Continue(HandlerState),
    /// Switch this connection to websocket framing. The HTTP lifecycle
    /// ends here; the framing session's callbacks take over.
    Upgrade(Arc<dyn WsHandler>),
    /// Initialization failed; the core synthesizes a server error.
    Fault(anyhow::Error),
}

/// Application handler invoked for a dispatched request cycle.
///
/// For every cycle whose `init` returned `Continue`, the core calls
/// `handle` then `terminate`, exactly once each, in that order, even when
/// `handle` faults. An `Upgrade` result replaces both with the framing
/// session's own lifecycle.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn init(&self, cx: &mut Cycle<'_>, opts: &HandlerOpts) -> Init;

    async fn handle(&self, cx: &mut Cycle<'_>, state: &mut HandlerState) -> anyhow::Result<()>;

    /// End-of-cycle notification. The return value is ignored.
    async fn terminate(&self, cx: &mut Cycle<'_>, state: HandlerState) {
        let _ = (cx, state);
    }
}
