//! Accept loop run by an acceptor event loop for one listening socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::event_loop::{EventLoopGroup, LoopContext};
use crate::lifecycle::drain::DrainTrigger;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::connection::{ConnectionHandler, ConnectionId};
use crate::net::listener::FireOnDrop;
use crate::net::options::SocketOptionSet;

/// Pause after an accept error that is not specific to one connection
/// (descriptor exhaustion and the like).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The listening socket plus its close latch.
///
/// Fields drop in declaration order: the socket is released before the
/// latch fires.
struct BoundSocket {
    listener: TcpListener,
    _closed: FireOnDrop,
}

/// Everything an accept loop needs, moved onto the acceptor thread.
pub(crate) struct AcceptLoop {
    pub(crate) listener: std::net::TcpListener,
    pub(crate) closed: FireOnDrop,
    pub(crate) close_requested: ShutdownSignal,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) workers: Arc<EventLoopGroup>,
    pub(crate) options: Arc<SocketOptionSet>,
    pub(crate) drain: Arc<DrainTrigger>,
}

impl AcceptLoop {
    pub(crate) async fn run(self, cx: LoopContext) {
        let AcceptLoop {
            listener,
            closed,
            mut close_requested,
            handler,
            workers,
            options,
            drain,
        } = self;

        let socket = match TcpListener::from_std(listener) {
            Ok(listener) => BoundSocket {
                listener,
                _closed: closed,
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to register listener with event loop");
                return;
            }
        };
        let local_addr = socket.listener.local_addr().ok();
        let mut group_shutdown = cx.shutdown();

        tracing::debug!(address = ?local_addr, acceptor = cx.index(), "Accept loop started");

        loop {
            tokio::select! {
                biased;

                _ = close_requested.recv() => break,
                _ = group_shutdown.recv() => break,
                accepted = socket.listener.accept() => match accepted {
                    Ok((stream, peer)) => dispatch(stream, peer, &handler, &workers, &options, drain.subscribe()),
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!(error = %e, "Connection failed before accept completed");
                    }
                    Err(e) => {
                        tracing::error!(address = ?local_addr, error = %e, "Accept error");
                        tokio::select! {
                            _ = close_requested.recv() => break,
                            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                        }
                    }
                },
            }
        }

        drop(socket);
        tracing::debug!(address = ?local_addr, "Listener closed");
    }
}

/// Move an accepted stream onto the worker loop picked by the chooser.
fn dispatch(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &Arc<dyn ConnectionHandler>,
    workers: &EventLoopGroup,
    options: &Arc<SocketOptionSet>,
    drain: ShutdownSignal,
) {
    let conn_id = ConnectionId::new();
    // Detach from this thread's reactor; the worker registers it with its own.
    let stream = match stream.into_std() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, peer = %peer, error = %e, "Failed to detach accepted stream");
            return;
        }
    };

    let handler = handler.clone();
    let options = options.clone();
    let assigned = workers.spawn_connection(move |_cx| async move {
        let stream = match TcpStream::from_std(stream) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to register stream with worker");
                return;
            }
        };
        if let Err(e) = options.apply_to_stream(&stream) {
            tracing::debug!(conn_id = %conn_id, error = %e, "Failed to apply socket options to stream");
        }
        handler.handle(stream, peer, drain).await;
        tracing::trace!(conn_id = %conn_id, "Connection finished");
    });

    match assigned {
        Some(worker) => tracing::debug!(conn_id = %conn_id, peer = %peer, worker, "Connection accepted"),
        None => tracing::debug!(conn_id = %conn_id, peer = %peer, "Worker pool shut down, dropping connection"),
    }
}

/// Errors that only affect the connection being accepted.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
