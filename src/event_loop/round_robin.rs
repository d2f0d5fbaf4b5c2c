//! Round-robin event loop assignment.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event_loop::{metrics::EventLoopMetrics, EventLoopChooser};

/// Round-robin chooser.
/// Stores an internal counter to rotate through loops; never looks at load.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLoopChooser for RoundRobin {
    fn next_loop(&self, loops: usize, _metrics: &dyn EventLoopMetrics) -> usize {
        if loops == 0 {
            return 0;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % loops
    }
}
