//! Authoritative server state and the run-once stop sequence.
//!
//! # State Machine
//! ```text
//! Created ──start──▶ Initializing ──bound──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!    │                    │                                        ▲
//!    │                    └──bind failure──────────────────────────┘
//!    └──stop (nothing to tear down)──────────────────────────────────────────▶ Stopped
//! ```
//!
//! # Design Decisions
//! - One mutex guards the state and everything owned while Running
//! - Stop claims its work under the lock and runs it outside, so a second
//!   caller (explicit or exit hook) sees Stopping and returns at once
//! - A stop that arrives during Initializing is parked and replayed by start

use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ServerError;
use crate::event_loop::{EventLoopGroup, EventLoopPools};
use crate::lifecycle::drain::ConnectionDrainer;
use crate::lifecycle::signals::ExitHook;
use crate::lifecycle::status::{InstanceStatus, StatusRegistry};
use crate::net::ListeningEndpoints;
use crate::transport::TransportKind;

/// Server lifecycle state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct Running {
    endpoints: ListeningEndpoints,
    addresses: Vec<SocketAddr>,
    pools: Option<EventLoopPools>,
}

struct Inner {
    state: ServerState,
    transport: Option<TransportKind>,
    running: Running,
    stop_requested: bool,
}

/// What a successful claim handed to the stopping thread.
enum Claim {
    Unstarted,
    Running(Running),
}

pub struct ShutdownCoordinator {
    inner: Mutex<Inner>,
    stopped: Condvar,
    status: Arc<dyn StatusRegistry>,
    drainer: Arc<dyn ConnectionDrainer>,
    exit_hook: Arc<dyn ExitHook>,
    termination_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        status: Arc<dyn StatusRegistry>,
        drainer: Arc<dyn ConnectionDrainer>,
        exit_hook: Arc<dyn ExitHook>,
        termination_timeout: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ServerState::Created,
                transport: None,
                running: Running::default(),
                stop_requested: false,
            }),
            stopped: Condvar::new(),
            status,
            drainer,
            exit_hook,
            termination_timeout,
        }
    }

    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// Transport chosen by the last start, if any.
    pub fn transport(&self) -> Option<TransportKind> {
        self.lock().transport
    }

    /// Worker pool while Running.
    pub fn workers(&self) -> Option<Arc<EventLoopGroup>> {
        self.lock().running.pools.as_ref().map(|pools| pools.workers.clone())
    }

    /// Bound addresses in bind order.
    ///
    /// Fails before start; empty once stopping has begun.
    pub fn listening_addresses(&self) -> Result<Vec<SocketAddr>, ServerError> {
        let inner = self.lock();
        match inner.state {
            ServerState::Created => Err(ServerError::NotStarted),
            ServerState::Running => Ok(inner.running.addresses.clone()),
            ServerState::Initializing | ServerState::Stopping | ServerState::Stopped => Ok(Vec::new()),
        }
    }

    /// Block until the state is Stopped or `timeout` elapses.
    ///
    /// A duplicate `stop` returns while the first is still running; this
    /// lets a caller wait for the sequence to finish.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .stopped
            .wait_timeout_while(inner, timeout, |inner| inner.state != ServerState::Stopped)
            .unwrap_or_else(|e| e.into_inner());
        inner.state == ServerState::Stopped
    }

    /// Created → Initializing.
    pub fn begin_start(&self) -> Result<(), ServerError> {
        let mut inner = self.lock();
        match inner.state {
            ServerState::Created => {
                self.transition(&mut inner, ServerState::Initializing);
                Ok(())
            }
            ServerState::Stopped => Err(ServerError::Stopped),
            ServerState::Initializing | ServerState::Running | ServerState::Stopping => {
                Err(ServerError::AlreadyStarted)
            }
        }
    }

    /// Initializing → Running, taking ownership of what start built.
    ///
    /// Returns true if a stop arrived while initializing; the caller must
    /// then call [`stop`](Self::stop).
    pub fn commit_running(&self, kind: TransportKind, endpoints: ListeningEndpoints, pools: EventLoopPools) -> bool {
        let mut inner = self.lock();
        inner.transport = Some(kind);
        inner.running = Running {
            addresses: endpoints.addresses(),
            endpoints,
            pools: Some(pools),
        };
        self.transition(&mut inner, ServerState::Running);
        inner.stop_requested
    }

    /// Start failed: Initializing → Stopping → Stopped, shutting down
    /// whatever pools were created.
    pub fn abort_start(&self, pools: Option<EventLoopPools>) {
        {
            let mut inner = self.lock();
            if inner.state != ServerState::Initializing {
                return;
            }
            self.transition(&mut inner, ServerState::Stopping);
        }

        if let Some(pools) = pools {
            self.shutdown_pools(&pools);
        }
        self.unregister_exit_hook();
        self.transition(&mut self.lock(), ServerState::Stopped);
    }

    /// Run the stop sequence once.
    ///
    /// Later and concurrent calls return immediately. Must not be called
    /// from one of the server's own event loop threads.
    pub fn stop(&self) {
        let claim = {
            let mut inner = self.lock();
            match inner.state {
                ServerState::Created => {
                    self.transition(&mut inner, ServerState::Stopping);
                    Claim::Unstarted
                }
                ServerState::Initializing => {
                    tracing::debug!("Stop requested during startup, deferring until listeners are bound");
                    inner.stop_requested = true;
                    return;
                }
                ServerState::Running => {
                    self.transition(&mut inner, ServerState::Stopping);
                    Claim::Running(std::mem::take(&mut inner.running))
                }
                ServerState::Stopping | ServerState::Stopped => {
                    tracing::debug!(state = ?inner.state, "Already stopped");
                    return;
                }
            }
        };

        if let Claim::Running(running) = claim {
            tracing::info!(listeners = running.addresses.len(), "Stopping server");
            if !running.endpoints.close_all(self.termination_timeout) {
                tracing::warn!("Some listeners were still open when the close wait ended");
            }
            self.status.set_local_status(InstanceStatus::Down);
            self.drainer.drain_all();
            if let Some(pools) = &running.pools {
                self.shutdown_pools(pools);
            }
        }

        self.unregister_exit_hook();
        self.transition(&mut self.lock(), ServerState::Stopped);
    }

    /// Signal both pools, then wait for them against one shared deadline.
    fn shutdown_pools(&self, pools: &EventLoopPools) {
        pools.acceptors.shutdown_gracefully();
        pools.workers.shutdown_gracefully();

        let deadline = Instant::now() + self.termination_timeout;
        for group in [&pools.acceptors, &pools.workers] {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !group.await_termination(remaining) {
                tracing::warn!(
                    group = group.name(),
                    timeout_secs = self.termination_timeout.as_secs(),
                    "Event loops did not terminate in time, continuing"
                );
            }
        }
    }

    fn unregister_exit_hook(&self) {
        // The process may already be exiting; nothing to escalate.
        if let Err(e) = self.exit_hook.unregister() {
            tracing::debug!(error = %e, "Failed to unregister exit hook");
        }
    }

    fn transition(&self, inner: &mut Inner, to: ServerState) {
        debug_assert!(to >= inner.state, "state regressed from {:?} to {:?}", inner.state, to);
        tracing::info!(from = ?inner.state, to = ?to, "Server state changed");
        inner.state = to;
        if to == ServerState::Stopped {
            self.stopped.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("termination_timeout", &self.termination_timeout)
            .finish()
    }
}
