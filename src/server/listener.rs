//! Listener control surface and supervision.
//!
//! A started listener owns one listening handle, a pool of acceptor tasks
//! sharing it, and the dynamic set of connection workers. Faults are
//! contained per worker: a failed connection worker only ever takes down
//! its own connection, while failed acceptors are restarted under a
//! time-windowed budget. Stopping is cooperative: acceptance halts
//! immediately, live connections run to natural completion.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::http::connection::Connection;
use crate::transport::Transport;

/// How many acceptor restarts are tolerated within the window before the
/// listener is considered failed.
const RESTART_BUDGET: usize = 5;
const RESTART_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("a listener named {0:?} is already running")]
    DuplicateName(String),
    #[error("no listener named {0:?}")]
    UnknownListener(String),
}

/// Externally observable state of a running listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    /// Acceptors are running.
    Running,
    /// The acceptor restart budget was exhausted; the listener no longer
    /// accepts connections and should be stopped.
    Failed,
}

/// Registry of running listeners, keyed by their unique names.
#[derive(Default)]
pub struct Server {
    listeners: Mutex<HashMap<String, ListenerHandle>>,
}

struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<ListenerStatus>,
    supervisor: JoinHandle<()>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind and start a listener. Returns the bound address (useful when
    /// the configuration asked for port 0).
    pub async fn start_listener<T: Transport>(
        &self,
        config: ListenerConfig,
        transport: T,
    ) -> Result<SocketAddr, ListenerError> {
        {
            let listeners = self.listeners.lock().expect("listener registry poisoned");
            if listeners.contains_key(&config.name) {
                return Err(ListenerError::DuplicateName(config.name));
            }
        }

        let handle = transport
            .listen(&config.transport)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: config.transport.bind_addr.clone(),
                source,
            })?;
        let local_addr = transport
            .local_addr(&handle)
            .map_err(|source| ListenerError::Bind {
                addr: config.transport.bind_addr.clone(),
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(ListenerStatus::Running);
        let name = config.name.clone();

        let supervisor = tokio::spawn(supervise(
            Arc::new(transport),
            Arc::new(handle),
            config,
            local_addr,
            shutdown_rx,
            status_tx,
        ));

        {
            let mut listeners = self.listeners.lock().expect("listener registry poisoned");
            if !listeners.contains_key(&name) {
                listeners.insert(
                    name,
                    ListenerHandle {
                        local_addr,
                        shutdown: shutdown_tx,
                        status: status_rx,
                        supervisor,
                    },
                );
                return Ok(local_addr);
            }
        }

        // Lost a race with a concurrent start under the same name. Shut the
        // fresh supervisor down instead of clobbering the winner's handle.
        let _ = shutdown_tx.send(true);
        let _ = supervisor.await;
        Err(ListenerError::DuplicateName(name))
    }

    /// Stop a listener: acceptance ends immediately, established
    /// connections are left to finish.
    pub async fn stop_listener(&self, name: &str) -> Result<(), ListenerError> {
        let handle = {
            let mut listeners = self.listeners.lock().expect("listener registry poisoned");
            listeners
                .remove(name)
                .ok_or_else(|| ListenerError::UnknownListener(name.to_string()))?
        };

        let _ = handle.shutdown.send(true);
        let _ = handle.supervisor.await;
        info!(listener = name, "listener stopped");
        Ok(())
    }

    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        let listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.get(name).map(|h| h.local_addr)
    }

    /// Current status of a registered listener, `None` for unknown names.
    pub fn status(&self, name: &str) -> Option<ListenerStatus> {
        let listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.get(name).map(|h| *h.status.borrow())
    }
}

enum AcceptorExit {
    Shutdown,
    Fatal,
}

/// The fault-isolation tree for one listener: owns the acceptor pool and
/// the dynamic set of connection workers, applies the restart policy, and
/// reports worker faults.
async fn supervise<T: Transport>(
    transport: Arc<T>,
    listen_handle: Arc<T::Handle>,
    config: ListenerConfig,
    local_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
    status: watch::Sender<ListenerStatus>,
) {
    let (conn_tx, mut conn_rx) = mpsc::channel::<(T::Stream, SocketAddr)>(128);

    let mut acceptors: JoinSet<AcceptorExit> = JoinSet::new();
    for id in 0..config.acceptors {
        acceptors.spawn(acceptor_loop(
            id,
            Arc::clone(&transport),
            Arc::clone(&listen_handle),
            conn_tx.clone(),
            shutdown.clone(),
        ));
    }
    let mut connections: JoinSet<anyhow::Result<()>> = JoinSet::new();
    let mut restarts: Vec<Instant> = Vec::new();
    let mut next_acceptor_id = config.acceptors;
    let mut failed = false;

    info!(
        listener = %config.name,
        addr = %local_addr,
        acceptors = config.acceptors,
        "listener started"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            Some((stream, peer)) = conn_rx.recv() => {
                debug!(listener = %config.name, peer = %peer, "accepted connection");
                let conn = Connection::new(
                    stream,
                    peer,
                    local_addr.port(),
                    transport.kind(),
                    Arc::clone(&config.protocol),
                );
                connections.spawn(conn.run());
            }

            Some(exit) = acceptors.join_next(), if !failed => {
                match exit {
                    Ok(AcceptorExit::Shutdown) => {}
                    Ok(AcceptorExit::Fatal) | Err(_) => {
                        let now = Instant::now();
                        restarts.retain(|t| now.duration_since(*t) < RESTART_WINDOW);
                        if restarts.len() >= RESTART_BUDGET {
                            error!(
                                listener = %config.name,
                                "acceptor restart budget exhausted; listener failed"
                            );
                            failed = true;
                            acceptors.abort_all();
                            let _ = status.send(ListenerStatus::Failed);
                        } else {
                            restarts.push(now);
                            warn!(listener = %config.name, "restarting failed acceptor");
                            acceptors.spawn(acceptor_loop(
                                next_acceptor_id,
                                Arc::clone(&transport),
                                Arc::clone(&listen_handle),
                                conn_tx.clone(),
                                shutdown.clone(),
                            ));
                            next_acceptor_id += 1;
                        }
                    }
                }
            }

            Some(joined) = connections.join_next() => {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(listener = %config.name, error = %e, "connection worker error");
                    }
                    Err(e) if e.is_panic() => {
                        error!(listener = %config.name, "connection worker panicked");
                    }
                    Err(_) => {}
                }
            }
        }
    }

    // Cooperative stop: kill acceptance now, detach live connections so
    // they run to completion on their own.
    acceptors.abort_all();
    connections.detach_all();
    debug!(listener = %config.name, "supervisor exited");
}

async fn acceptor_loop<T: Transport>(
    id: usize,
    transport: Arc<T>,
    listen_handle: Arc<T::Handle>,
    conn_tx: mpsc::Sender<(T::Stream, SocketAddr)>,
    mut shutdown: watch::Receiver<bool>,
) -> AcceptorExit {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return AcceptorExit::Shutdown,

            res = transport.accept(&listen_handle) => match res {
                Ok(pair) => {
                    if conn_tx.send(pair).await.is_err() {
                        return AcceptorExit::Shutdown;
                    }
                }
                Err(e) if transient(&e) => {
                    warn!(acceptor = id, error = %e, "transient accept failure");
                }
                Err(e) => {
                    error!(acceptor = id, error = %e, "accept failed; acceptor exiting");
                    return AcceptorExit::Fatal;
                }
            }
        }
    }
}

/// Accept failures that concern one connection attempt, not the listening
/// handle itself.
fn transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
