//! Portico: server lifecycle management.
//!
//! Selects an I/O transport, builds acceptor and worker event loop pools,
//! binds listeners in order and runs a single, idempotent stop sequence
//! whether stop comes from the API or from a process-exit signal.

// Core subsystems
pub mod event_loop;
pub mod lifecycle;
pub mod net;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod observability;

pub use config::schema::ServerConfig;
pub use error::ServerError;
pub use lifecycle::{ServerLifecycle, ServerState};
pub use net::{ListenerSpecs, SocketOptionSet};
pub use transport::TransportKind;
