//! Listener specifications and bound listening endpoints.
//!
//! # Responsibilities
//! - Keep the ordered, address-unique set of listeners to bind
//! - Create listening sockets with the effective option set
//! - Track bound endpoints and their close signals

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::net::connection::ConnectionHandler;
use crate::net::options::SocketOptionSet;

/// An address plus the handler its connections go to.
#[derive(Clone)]
pub struct ListenerSpec {
    address: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
}

impl ListenerSpec {
    pub fn new(address: SocketAddr, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self { address, handler }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for ListenerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSpec").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Listeners in bind order, unique by address.
#[derive(Debug, Clone, Default)]
pub struct ListenerSpecs {
    specs: Vec<ListenerSpec>,
}

impl ListenerSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wildcard IPv4 listeners for each port, in the given order.
    pub fn from_ports<I, H>(ports: I) -> Self
    where
        I: IntoIterator<Item = (u16, H)>,
        H: ConnectionHandler,
    {
        ports.into_iter().fold(Self::new(), |specs, (port, handler)| {
            specs.with(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into(), handler)
        })
    }

    pub fn with<H: ConnectionHandler>(mut self, address: SocketAddr, handler: H) -> Self {
        self.insert(address, Arc::new(handler));
        self
    }

    /// Add a listener. An existing address keeps its position and gets the new handler.
    pub fn insert(&mut self, address: SocketAddr, handler: Arc<dyn ConnectionHandler>) {
        match self.specs.iter_mut().find(|spec| spec.address == address) {
            Some(existing) => existing.handler = handler,
            None => self.specs.push(ListenerSpec::new(address, handler)),
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListenerSpec> {
        self.specs.iter()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.specs.iter().map(ListenerSpec::address).collect()
    }
}

impl<'a> IntoIterator for &'a ListenerSpecs {
    type Item = &'a ListenerSpec;
    type IntoIter = std::slice::Iter<'a, ListenerSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

/// Creates a bound, listening socket.
pub trait SocketBinder: Send + Sync {
    fn bind(&self, address: SocketAddr, options: &SocketOptionSet) -> io::Result<TcpListener>;
}

/// [`SocketBinder`] that binds real TCP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBinder;

impl SocketBinder for TcpBinder {
    fn bind(&self, address: SocketAddr, options: &SocketOptionSet) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        options.apply_to_listener(&socket)?;
        socket.bind(&address.into())?;
        socket.listen(options.backlog())?;
        Ok(socket.into())
    }
}

/// Result of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Closed,
    Interrupted,
}

/// One-shot latch fired when a listening socket has been closed.
#[derive(Debug, Default)]
pub struct CloseSignal {
    closed: Mutex<bool>,
    cond: Condvar,
}

impl CloseSignal {
    const POLL: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until closed, or until `interrupted` is raised.
    pub fn wait(&self, interrupted: &AtomicBool) -> WaitOutcome {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *closed {
                return WaitOutcome::Closed;
            }
            if interrupted.load(Ordering::SeqCst) {
                return WaitOutcome::Interrupted;
            }
            closed = match self.cond.wait_timeout(closed, Self::POLL) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Block until closed or `timeout` elapses. Returns whether it closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        while !*closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            closed = match self.cond.wait_timeout(closed, remaining) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

/// Fires the signal when dropped, so a panicking accept loop still reports closure.
pub(crate) struct FireOnDrop(pub(crate) Arc<CloseSignal>);

impl Drop for FireOnDrop {
    fn drop(&mut self) {
        self.0.fire();
    }
}

/// A bound listener whose accept loop is running on an acceptor thread.
#[derive(Debug)]
pub struct ListeningEndpoint {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    closed: Arc<CloseSignal>,
}

impl ListeningEndpoint {
    pub(crate) fn new(local_addr: SocketAddr) -> (Self, ShutdownSignal, Arc<CloseSignal>) {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let closed = Arc::new(CloseSignal::new());
        let endpoint = Self {
            local_addr,
            shutdown,
            closed: closed.clone(),
        };
        (endpoint, signal, closed)
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the accept loop to drop the socket.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub fn close_signal(&self) -> Arc<CloseSignal> {
        self.closed.clone()
    }
}

/// Endpoints bound by one start, in bind order.
#[derive(Debug, Default)]
pub struct ListeningEndpoints {
    endpoints: Vec<ListeningEndpoint>,
}

impl ListeningEndpoints {
    pub(crate) fn push(&mut self, endpoint: ListeningEndpoint) {
        self.endpoints.push(endpoint);
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(ListeningEndpoint::local_addr).collect()
    }

    pub fn close_signals(&self) -> Vec<Arc<CloseSignal>> {
        self.endpoints.iter().map(ListeningEndpoint::close_signal).collect()
    }

    /// Close every endpoint and wait (bounded) for the sockets to be released.
    ///
    /// Returns false if some socket was still open when `timeout` elapsed.
    pub fn close_all(self, timeout: Duration) -> bool {
        for endpoint in &self.endpoints {
            endpoint.close();
        }
        let deadline = Instant::now() + timeout;
        self.endpoints.iter().all(|endpoint| {
            let closed = endpoint
                .closed
                .wait_timeout(deadline.saturating_duration_since(Instant::now()));
            if !closed {
                tracing::warn!(address = %endpoint.local_addr, "Listener did not close in time");
            }
            closed
        })
    }
}
