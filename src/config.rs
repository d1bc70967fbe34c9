//! Listener and protocol configuration.
//!
//! The declarative part (`ListenerSpec`) can be loaded from YAML; the
//! dispatch table carries live handler objects and is attached in code.
//! A `ListenerConfig` is immutable once its listener starts; changing it
//! means stopping and restarting the listener.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::DispatchTable;
use crate::transport::TransportOptions;

/// Protocol-level size limits.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Limits {
    /// Maximum size of the request line plus header block, in bytes.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Maximum declared or chunked body size, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Maximum websocket frame payload, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_header_bytes() -> usize {
    16 * 1024
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: default_max_header_bytes(),
            max_body_bytes: default_max_body_bytes(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Declarative listener settings, loadable from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSpec {
    /// Unique listener name; the key used by `stop_listener`.
    pub name: String,
    /// Number of acceptor workers sharing the listening handle.
    #[serde(default = "default_acceptors")]
    pub acceptors: usize,
    /// Address to bind.
    pub bind_addr: String,
    /// How long to wait for the next request line before closing an idle
    /// keep-alive connection, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub limits: Limits,
}

fn default_acceptors() -> usize {
    4
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

impl ListenerSpec {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

/// Protocol options shared read-only by every worker of a listener.
pub struct ProtocolOptions {
    pub table: DispatchTable,
    pub idle_timeout: Duration,
    pub limits: Limits,
}

/// Full configuration for one listener.
pub struct ListenerConfig {
    pub name: String,
    pub acceptors: usize,
    pub transport: TransportOptions,
    pub protocol: Arc<ProtocolOptions>,
}

impl ListenerConfig {
    /// Combine a declarative spec with a live dispatch table.
    pub fn from_spec(spec: &ListenerSpec, table: DispatchTable) -> Self {
        Self {
            name: spec.name.clone(),
            acceptors: spec.acceptors.max(1),
            transport: TransportOptions {
                bind_addr: spec.bind_addr.clone(),
            },
            protocol: Arc::new(ProtocolOptions {
                table,
                idle_timeout: Duration::from_millis(spec.idle_timeout_ms),
                limits: spec.limits,
            }),
        }
    }
}
