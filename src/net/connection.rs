//! Per-connection handling capability and identifiers.
//!
//! # Responsibilities
//! - Define what a listener hands each accepted connection to
//! - Tag each accepted connection for log correlation

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;

use crate::lifecycle::shutdown::ShutdownSignal;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique tag attached to accept and worker log lines for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        // Only uniqueness matters here.
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Protocol logic attached to a listener.
///
/// One handler is shared by every worker loop; each accepted connection gets
/// its own future, which runs to completion on the worker it was assigned to.
/// The future does not need to be `Send`.
///
/// `drain` fires when the server drains connections. A handler should finish
/// its current exchange and return, which closes the stream.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, drain: ShutdownSignal) -> Pin<Box<dyn Future<Output = ()>>>;
}

impl<F, Fut> ConnectionHandler for F
where
    F: Fn(TcpStream, SocketAddr, ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + 'static,
{
    fn handle(&self, stream: TcpStream, peer: SocketAddr, drain: ShutdownSignal) -> Pin<Box<dyn Future<Output = ()>>> {
        Box::pin(self(stream, peer, drain))
    }
}
