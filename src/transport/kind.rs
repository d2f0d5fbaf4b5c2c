//! Transport variants.

use std::fmt;

/// The I/O multiplexing mechanism backing a server instance.
///
/// Chosen once when the server starts and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Linux epoll.
    NativeEpoll,
    /// BSD/macOS kqueue.
    NativeKqueue,
    /// Portable fallback, available everywhere.
    Portable,
}

impl TransportKind {
    /// Name of the server channel type this transport listens with.
    pub fn server_channel(&self) -> &'static str {
        match self {
            TransportKind::NativeEpoll => "epoll-server-socket",
            TransportKind::NativeKqueue => "kqueue-server-socket",
            TransportKind::Portable => "portable-server-socket",
        }
    }

    /// Name of the client channel type paired with this transport.
    pub fn client_channel(&self) -> &'static str {
        match self {
            TransportKind::NativeEpoll => "epoll-socket",
            TransportKind::NativeKqueue => "kqueue-socket",
            TransportKind::Portable => "portable-socket",
        }
    }

    pub fn is_native(&self) -> bool {
        !matches!(self, TransportKind::Portable)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::NativeEpoll => "epoll",
            TransportKind::NativeKqueue => "kqueue",
            TransportKind::Portable => "portable",
        })
    }
}
