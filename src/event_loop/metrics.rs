//! Per-event-loop connection accounting.
//!
//! # Responsibilities
//! - Count live connections per worker loop
//! - Feed the least-connections chooser
//! - Mirror counts into the `metrics` facade

use std::sync::Arc;

use dashmap::DashMap;

/// Live connection counts per event loop.
///
/// Implementations are shared between the acceptor threads (which record a
/// connection when it is handed to a worker) and the worker threads (which
/// record its end).
pub trait EventLoopMetrics: Send + Sync {
    fn connection_opened(&self, event_loop: usize);

    fn connection_closed(&self, event_loop: usize);

    fn active_connections(&self, event_loop: usize) -> usize;
}

/// Default [`EventLoopMetrics`] backed by a concurrent map.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    counts: DashMap<usize, usize>,
}

impl ConnectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum across all loops.
    pub fn total(&self) -> usize {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    fn publish(event_loop: usize, count: usize) {
        metrics::gauge!("server_active_connections", "event_loop" => event_loop.to_string()).set(count as f64);
    }
}

impl EventLoopMetrics for ConnectionCounters {
    fn connection_opened(&self, event_loop: usize) {
        let count = {
            let mut entry = self.counts.entry(event_loop).or_insert(0);
            *entry += 1;
            *entry
        };
        metrics::counter!("server_connections_accepted_total").increment(1);
        Self::publish(event_loop, count);
    }

    fn connection_closed(&self, event_loop: usize) {
        let count = match self.counts.get_mut(&event_loop) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry
            }
            None => 0,
        };
        Self::publish(event_loop, count);
    }

    fn active_connections(&self, event_loop: usize) -> usize {
        self.counts.get(&event_loop).map(|entry| *entry).unwrap_or(0)
    }
}

/// Guard that tracks a connection's lifetime on one event loop.
/// Decrements the loop's count when dropped.
pub struct ConnectionGuard {
    event_loop: usize,
    metrics: Arc<dyn EventLoopMetrics>,
}

impl ConnectionGuard {
    pub(crate) fn open(event_loop: usize, metrics: Arc<dyn EventLoopMetrics>) -> Self {
        metrics.connection_opened(event_loop);
        Self { event_loop, metrics }
    }

    /// Index of the loop this connection was assigned to.
    pub fn event_loop(&self) -> usize {
        self.event_loop
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.metrics.connection_closed(self.event_loop);
        tracing::trace!(event_loop = self.event_loop, "Connection closed");
    }
}
