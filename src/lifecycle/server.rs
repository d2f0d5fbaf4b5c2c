//! The outward-facing server: start, stop and queries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event_loop::{ConnectionCounters, EventLoopMetrics, EventLoopPoolManager, MetricsPoolHook, PoolCreationHook};
use crate::lifecycle::coordinator::{ServerState, ShutdownCoordinator};
use crate::lifecycle::drain::{ConnectionDrainer, DrainTrigger, WaitForIdle};
use crate::lifecycle::signals::{ExitHook, SignalExitHook};
use crate::lifecycle::status::{LocalStatus, StatusRegistry};
use crate::net::{ListenerBinder, ListenerSpecs, SocketBinder, SocketOptionSet, TcpBinder, WaitOutcome};
use crate::transport::{PlatformProbe, TransportKind, TransportProbe, TransportSelector};

/// A server instance: one start, one stop.
///
/// `start` and `stop` may be called from different threads; stop also runs
/// from the process-exit hook registered at construction.
pub struct ServerLifecycle {
    force_portable: bool,
    specs: ListenerSpecs,
    selector: TransportSelector,
    pool_manager: EventLoopPoolManager,
    binder: ListenerBinder,
    coordinator: Arc<ShutdownCoordinator>,
    drainer: Arc<dyn ConnectionDrainer>,
    interrupted: AtomicBool,
}

impl ServerLifecycle {
    /// Builder with production collaborators by default.
    pub fn builder(config: ServerConfig, specs: ListenerSpecs) -> ServerLifecycleBuilder {
        ServerLifecycleBuilder {
            config,
            specs,
            status: None,
            drainer: None,
            exit_hook: None,
            probe: None,
            socket_binder: None,
            pool_hook: None,
            metrics: None,
        }
    }

    /// Select transport, build pools, bind listeners.
    ///
    /// With `block_until_closed`, keeps the caller until every listener has
    /// closed (by `stop`) or [`interrupt`](Self::interrupt) is called.
    pub fn start(&self, block_until_closed: bool) -> Result<(), ServerError> {
        self.coordinator.begin_start()?;

        let kind = self.selector.select(self.force_portable);

        let pools = match self.pool_manager.build(kind) {
            Ok(pools) => pools,
            Err(e) => {
                self.coordinator.abort_start(None);
                return Err(e);
            }
        };

        let endpoints = match self.binder.bind_all(&self.specs, &SocketOptionSet::common(), &pools, kind) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                self.coordinator.abort_start(Some(pools));
                return Err(e);
            }
        };

        let close_signals = endpoints.close_signals();
        tracing::info!(transport = %kind, addresses = ?endpoints.addresses(), "Server started");

        if self.coordinator.commit_running(kind, endpoints, pools) {
            self.coordinator.stop();
        }

        if block_until_closed
            && ListenerBinder::wait_until_closed(&close_signals, &self.interrupted) == WaitOutcome::Interrupted
        {
            tracing::info!("Interrupted while waiting for listeners to close");
        }

        Ok(())
    }

    /// Run the stop sequence. Idempotent.
    pub fn stop(&self) {
        self.coordinator.stop();
    }

    /// Wait for a stop started elsewhere (exit hook, another thread) to finish.
    pub fn await_stopped(&self, timeout: Duration) -> bool {
        self.coordinator.wait_stopped(timeout)
    }

    pub fn state(&self) -> ServerState {
        self.coordinator.state()
    }

    /// Bound addresses in bind order; `NotStarted` before start, empty after stop.
    pub fn listening_addresses(&self) -> Result<Vec<SocketAddr>, ServerError> {
        self.coordinator.listening_addresses()
    }

    /// Transport selected by `start`.
    pub fn transport(&self) -> Option<TransportKind> {
        self.coordinator.transport()
    }

    /// Invoke the drainer outside of a stop.
    pub fn drain_connections(&self) {
        self.drainer.drain_all();
    }

    /// Block until every worker loop has processed a no-op task.
    ///
    /// Returns false when the server is not running.
    pub fn wait_for_each_event_loop(&self) -> bool {
        self.coordinator
            .workers()
            .map(|workers| workers.sync_each())
            .unwrap_or(false)
    }

    /// Wake a `start(true)` blocked on listener closure.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ServerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLifecycle")
            .field("listeners", &self.specs)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

/// Collaborator overrides for [`ServerLifecycle`].
pub struct ServerLifecycleBuilder {
    config: ServerConfig,
    specs: ListenerSpecs,
    status: Option<Arc<dyn StatusRegistry>>,
    drainer: Option<Arc<dyn ConnectionDrainer>>,
    exit_hook: Option<Arc<dyn ExitHook>>,
    probe: Option<Arc<dyn TransportProbe>>,
    socket_binder: Option<Arc<dyn SocketBinder>>,
    pool_hook: Option<Arc<dyn PoolCreationHook>>,
    metrics: Option<Arc<dyn EventLoopMetrics>>,
}

impl ServerLifecycleBuilder {
    pub fn status(mut self, status: Arc<dyn StatusRegistry>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn drainer(mut self, drainer: Arc<dyn ConnectionDrainer>) -> Self {
        self.drainer = Some(drainer);
        self
    }

    pub fn exit_hook(mut self, exit_hook: Arc<dyn ExitHook>) -> Self {
        self.exit_hook = Some(exit_hook);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn TransportProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn socket_binder(mut self, binder: Arc<dyn SocketBinder>) -> Self {
        self.socket_binder = Some(binder);
        self
    }

    pub fn pool_hook(mut self, hook: Arc<dyn PoolCreationHook>) -> Self {
        self.pool_hook = Some(hook);
        self
    }

    /// Source of per-worker connection counts (least-connections, draining).
    pub fn metrics(mut self, metrics: Arc<dyn EventLoopMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire everything and register the exit hook.
    pub fn build(self) -> ServerLifecycle {
        let config = self.config;

        #[allow(deprecated)]
        let use_epoll = config.transport.use_epoll;
        if use_epoll {
            tracing::debug!("transport.use_epoll is deprecated and has no effect");
        }

        let timeout = config.shutdown.termination_timeout();
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(ConnectionCounters::new()));
        let status = self.status.unwrap_or_else(|| Arc::new(LocalStatus::new()));
        let drain = Arc::new(DrainTrigger::new());
        let drainer = self.drainer.unwrap_or_else(|| {
            Arc::new(WaitForIdle::new(
                metrics.clone(),
                config.event_loops.worker_threads,
                timeout,
                drain.clone(),
            ))
        });
        let exit_hook = self.exit_hook.unwrap_or_else(|| Arc::new(SignalExitHook::new()));

        let coordinator = Arc::new(ShutdownCoordinator::new(
            status.clone(),
            drainer.clone(),
            exit_hook.clone(),
            timeout,
        ));

        let weak: Weak<ShutdownCoordinator> = Arc::downgrade(&coordinator);
        if let Err(e) = exit_hook.register(Box::new(move || {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.stop();
            }
        })) {
            tracing::warn!(error = %e, "Failed to register exit hook, stop must be called explicitly");
        }

        ServerLifecycle {
            force_portable: config.transport.force_portable,
            selector: TransportSelector::new(self.probe.unwrap_or_else(|| Arc::new(PlatformProbe))),
            pool_manager: EventLoopPoolManager::new(
                config.name.clone(),
                config.event_loops.clone(),
                metrics,
                self.pool_hook.unwrap_or_else(|| Arc::new(MetricsPoolHook)),
            ),
            binder: ListenerBinder::new(
                self.socket_binder.unwrap_or_else(|| Arc::new(TcpBinder)),
                status,
                drain,
            ),
            specs: self.specs,
            coordinator,
            drainer,
            interrupted: AtomicBool::new(false),
        }
    }
}
