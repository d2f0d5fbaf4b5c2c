//! Shared fakes for lifecycle integration tests.
//!
//! Every fake appends to one [`EventLog`] so tests can assert the order in
//! which collaborators were called.

#![allow(dead_code)]

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use portico::config::ServerConfig;
use portico::lifecycle::{
    ConnectionDrainer, ExitCallback, ExitHook, HookError, InstanceStatus, ShutdownSignal, StatusRegistry,
};
use portico::net::{ListenerSpecs, SocketBinder, SocketOptionSet, TcpBinder};
use portico::transport::{NativeTransport, ProbeError, TransportProbe};
use portico::ServerLifecycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(InstanceStatus),
    Bind(SocketAddr),
    Drain,
    HookUnregistered,
}

/// Ordered, shared record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub struct RecordingStatus(pub EventLog);

impl StatusRegistry for RecordingStatus {
    fn set_local_status(&self, status: InstanceStatus) {
        self.0.push(Event::Status(status));
    }
}

pub struct RecordingDrainer(pub EventLog);

impl ConnectionDrainer for RecordingDrainer {
    fn drain_all(&self) {
        self.0.push(Event::Drain);
    }
}

/// Exit hook the test fires by hand.
pub struct ManualExitHook {
    log: EventLog,
    callback: Mutex<Option<ExitCallback>>,
}

impl ManualExitHook {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            callback: Mutex::new(None),
        }
    }

    /// Simulate the process being asked to exit. Returns false if nothing was registered.
    pub fn trigger(&self) -> bool {
        let callback = self.callback.lock().unwrap().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl ExitHook for ManualExitHook {
    fn register(&self, callback: ExitCallback) -> Result<(), HookError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn unregister(&self) -> Result<(), HookError> {
        self.log.push(Event::HookUnregistered);
        match self.callback.lock().unwrap().take() {
            Some(_) => Ok(()),
            None => Err(HookError::ProcessExiting),
        }
    }
}

/// Probe answering from fixed availability flags.
pub struct FakeProbe {
    pub epoll: bool,
    pub kqueue: bool,
}

impl TransportProbe for FakeProbe {
    fn probe(&self, transport: NativeTransport) -> Result<(), ProbeError> {
        let available = match transport {
            NativeTransport::Epoll => self.epoll,
            NativeTransport::Kqueue => self.kqueue,
        };
        if available {
            Ok(())
        } else {
            Err(ProbeError::Unsupported {
                transport,
                os: "test",
            })
        }
    }
}

/// Binds real loopback sockets, failing the nth attempt (1-based).
pub struct RecordingBinder {
    log: EventLog,
    fail_on: Option<usize>,
    attempts: AtomicUsize,
}

impl RecordingBinder {
    pub fn new(log: EventLog, fail_on: Option<usize>) -> Self {
        Self {
            log,
            fail_on,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SocketBinder for RecordingBinder {
    fn bind(&self, address: SocketAddr, options: &SocketOptionSet) -> io::Result<TcpListener> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(Event::Bind(address));
        if self.fail_on == Some(attempt) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        TcpBinder.bind(address, options)
    }
}

/// Handler that closes the connection immediately.
pub fn close_immediately(_stream: TcpStream, _peer: SocketAddr, _drain: ShutdownSignal) -> std::future::Ready<()> {
    std::future::ready(())
}

/// Handler that echoes bytes until the peer hangs up or a drain is requested.
pub async fn echo_until_drained(mut stream: TcpStream, _peer: SocketAddr, mut drain: ShutdownSignal) {
    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            _ = drain.recv() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            },
        }
    }
}

/// Small pools, portable transport, short termination timeout.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.name = "it".to_string();
    config.event_loops.acceptor_threads = 1;
    config.event_loops.worker_threads = 2;
    config.transport.force_portable = true;
    config.shutdown.termination_timeout_secs = 5;
    config
}

/// A loopback address on a port that was free a moment ago.
pub fn free_loopback_address() -> SocketAddr {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// `count` loopback listeners on ephemeral ports.
pub fn loopback_specs(count: usize) -> ListenerSpecs {
    // Specs are unique by address, so each needs its own reserved port.
    (0..count).fold(ListenerSpecs::new(), |specs, _| {
        specs.with(free_loopback_address(), close_immediately)
    })
}

/// A server wired to recording fakes.
pub struct Harness {
    pub log: EventLog,
    pub hook: Arc<ManualExitHook>,
    pub binder: Arc<RecordingBinder>,
    pub server: ServerLifecycle,
}

impl Harness {
    pub fn new(specs: ListenerSpecs) -> Self {
        Self::with_failing_bind(specs, None)
    }

    pub fn with_failing_bind(specs: ListenerSpecs, fail_on: Option<usize>) -> Self {
        let log = EventLog::default();
        let hook = Arc::new(ManualExitHook::new(log.clone()));
        let binder = Arc::new(RecordingBinder::new(log.clone(), fail_on));
        let server = ServerLifecycle::builder(test_config(), specs)
            .status(Arc::new(RecordingStatus(log.clone())))
            .drainer(Arc::new(RecordingDrainer(log.clone())))
            .exit_hook(hook.clone())
            .socket_binder(binder.clone())
            .build();
        Self {
            log,
            hook,
            binder,
            server,
        }
    }
}
