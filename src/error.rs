//! Error types surfaced by the server lifecycle.
//!
//! Transport probing failures never show up here: they are recovered inside
//! the selector. Shutdown-path failures are logged and swallowed. What is left
//! is configuration/bind trouble and API misuse, all of which propagate to the
//! immediate caller.

use std::io;
use std::net::SocketAddr;

/// Top-level error for starting, querying and stopping a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A listener failed to bind. Startup is aborted.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The effective socket option set was rejected before binding.
    #[error("invalid socket options for {address}: {reason}")]
    InvalidOptions { address: SocketAddr, reason: String },

    /// An event loop thread could not be created.
    #[error("failed to start event loop `{name}`: {source}")]
    EventLoop {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Listening addresses were queried before `start` ran.
    #[error("server has not been started")]
    NotStarted,

    /// `start` was called on an instance that already left the Created state.
    #[error("server has already been started")]
    AlreadyStarted,

    /// `start` was called on a stopped instance.
    #[error("server has been stopped")]
    Stopped,
}

impl ServerError {
    /// Returns true when this error came from a failed bind.
    pub fn is_bind(&self) -> bool {
        matches!(self, ServerError::Bind { .. })
    }
}
