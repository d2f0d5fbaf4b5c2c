//! Post-pool-creation extension point.

use crate::event_loop::group::EventLoopGroup;

/// Invoked once both pools exist, before any listener is bound.
///
/// For instrumentation only: it sees the pools but cannot change them.
pub trait PoolCreationHook: Send + Sync {
    fn on_pools_created(&self, acceptors: &EventLoopGroup, workers: &EventLoopGroup);
}

impl<F> PoolCreationHook for F
where
    F: Fn(&EventLoopGroup, &EventLoopGroup) + Send + Sync,
{
    fn on_pools_created(&self, acceptors: &EventLoopGroup, workers: &EventLoopGroup) {
        self(acceptors, workers)
    }
}

/// Default hook: publishes pool sizes as gauges.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsPoolHook;

impl PoolCreationHook for MetricsPoolHook {
    fn on_pools_created(&self, acceptors: &EventLoopGroup, workers: &EventLoopGroup) {
        metrics::gauge!("server_event_loop_threads", "pool" => "acceptor").set(acceptors.size() as f64);
        metrics::gauge!("server_event_loop_threads", "pool" => "worker").set(workers.size() as f64);
    }
}
