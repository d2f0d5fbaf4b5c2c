//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a server instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix for event loop thread names.
    pub name: String,

    /// Acceptor/worker pool sizing and worker assignment.
    pub event_loops: EventLoopConfig,

    /// Transport selection flags.
    pub transport: TransportConfig,

    /// Stop sequence tuning.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Addresses to listen on, bound in this order.
    pub listeners: Vec<ListenerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            event_loops: EventLoopConfig::default(),
            transport: TransportConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
            listeners: Vec::new(),
        }
    }
}

/// How accepted connections are spread across worker loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAssignment {
    /// Cyclic assignment.
    #[default]
    RoundRobin,
    /// Pick the worker with the fewest live connections.
    LeastConnections,
}

/// Event loop pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Threads dedicated to accepting connections.
    pub acceptor_threads: usize,

    /// Threads handling I/O for accepted connections.
    pub worker_threads: usize,

    /// Worker assignment strategy.
    pub worker_assignment: WorkerAssignment,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            acceptor_threads: 1,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            worker_assignment: WorkerAssignment::RoundRobin,
        }
    }
}

/// Transport selection flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Skip native transport detection and use the portable fallback.
    pub force_portable: bool,

    /// Native transports are detected automatically; this flag has no effect.
    /// Use `force_portable` to opt out of them instead.
    #[deprecated(note = "native transports are detected automatically; this flag is ignored")]
    pub use_epoll: bool,
}

/// Stop sequence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for event loop termination.
    pub termination_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn termination_timeout(&self) -> Duration {
        Duration::from_secs(self.termination_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            termination_timeout_secs: 20,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A single listening address.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,
}
