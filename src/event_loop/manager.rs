//! Builds the acceptor and worker pools for a selected transport.

use std::sync::Arc;

use crate::config::{EventLoopConfig, WorkerAssignment};
use crate::error::ServerError;
use crate::event_loop::{
    group::EventLoopGroup,
    hook::PoolCreationHook,
    least_conn::LeastConnections,
    metrics::EventLoopMetrics,
    round_robin::RoundRobin,
    EventLoopChooser,
};
use crate::net::options::{OptionValue, SocketOption, SocketOptionSet, DEFER_ACCEPT_DISABLED};
use crate::transport::TransportKind;

/// Everything the binder needs from the pool manager.
#[derive(Debug)]
pub struct EventLoopPools {
    pub acceptors: Arc<EventLoopGroup>,
    pub workers: Arc<EventLoopGroup>,
    /// Options only the selected transport understands.
    pub transport_options: SocketOptionSet,
}

/// Creates pools according to [`EventLoopConfig`].
pub struct EventLoopPoolManager {
    name: String,
    config: EventLoopConfig,
    metrics: Arc<dyn EventLoopMetrics>,
    hook: Arc<dyn PoolCreationHook>,
}

impl EventLoopPoolManager {
    pub fn new(
        name: impl Into<String>,
        config: EventLoopConfig,
        metrics: Arc<dyn EventLoopMetrics>,
        hook: Arc<dyn PoolCreationHook>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            metrics,
            hook,
        }
    }

    /// Spawn both pools and run the creation hook.
    pub fn build(&self, kind: TransportKind) -> Result<EventLoopPools, ServerError> {
        let acceptors = EventLoopGroup::new(
            format!("{}-acceptor", self.name),
            self.config.acceptor_threads,
            Box::new(RoundRobin::new()),
            self.metrics.clone(),
        )?;
        let workers = EventLoopGroup::new(
            format!("{}-worker", self.name),
            self.config.worker_threads,
            chooser(self.config.worker_assignment),
            self.metrics.clone(),
        )?;

        tracing::info!(
            transport = %kind,
            acceptor_threads = acceptors.size(),
            worker_threads = workers.size(),
            worker_assignment = ?self.config.worker_assignment,
            "Event loops created"
        );

        self.hook.on_pools_created(&acceptors, &workers);

        Ok(EventLoopPools {
            acceptors: Arc::new(acceptors),
            workers: Arc::new(workers),
            transport_options: transport_options(kind),
        })
    }
}

fn chooser(assignment: WorkerAssignment) -> Box<dyn EventLoopChooser> {
    match assignment {
        WorkerAssignment::RoundRobin => Box::new(RoundRobin::new()),
        WorkerAssignment::LeastConnections => Box::new(LeastConnections::new()),
    }
}

/// Socket options that only apply to `kind`.
pub fn transport_options(kind: TransportKind) -> SocketOptionSet {
    match kind {
        TransportKind::NativeEpoll => SocketOptionSet::new()
            .with(SocketOption::TcpDeferAccept, OptionValue::Int(DEFER_ACCEPT_DISABLED)),
        TransportKind::NativeKqueue | TransportKind::Portable => SocketOptionSet::new(),
    }
}
