//! Least-connections event loop assignment.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event_loop::{metrics::EventLoopMetrics, EventLoopChooser};

/// Least connections chooser.
/// Selects the loop with the fewest live connections. Ties go to whichever
/// tied loop comes first in round-robin order from a rotating start.
#[derive(Debug, Default)]
pub struct LeastConnections {
    counter: AtomicUsize,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLoopChooser for LeastConnections {
    fn next_loop(&self, loops: usize, metrics: &dyn EventLoopMetrics) -> usize {
        if loops == 0 {
            return 0;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        (0..loops)
            .map(|offset| (start + offset) % loops)
            .min_by_key(|idx| metrics.active_connections(*idx))
            .unwrap_or(0)
    }
}
