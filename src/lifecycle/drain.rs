//! Connection draining collaborator.
//!
//! # Design Decisions
//! - Handlers receive a [`ShutdownSignal`] from the current drain round and
//!   close their connection when it fires
//! - Each trigger starts a new round, so a manual drain does not poison
//!   connections accepted afterwards

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::event_loop::EventLoopMetrics;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};

/// Blocking "drain all client connections".
///
/// Called once per stop, after status goes DOWN and before the pools shut
/// down. Implementations must tolerate being called again (for example via
/// a manual drain).
pub trait ConnectionDrainer: Send + Sync {
    fn drain_all(&self);
}

impl<F> ConnectionDrainer for F
where
    F: Fn() + Send + Sync,
{
    fn drain_all(&self) {
        self()
    }
}

/// Drain request handed to every accepted connection.
#[derive(Debug, Default)]
pub struct DrainTrigger {
    round: Mutex<Shutdown>,
}

impl DrainTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for a connection accepted now.
    pub fn subscribe(&self) -> ShutdownSignal {
        self.round().subscribe()
    }

    /// Fire the signal held by every live connection.
    ///
    /// Connections subscribed after this call get a fresh, untriggered signal.
    pub fn trigger(&self) {
        let current = std::mem::take(&mut *self.round());
        current.trigger();
    }

    fn round(&self) -> std::sync::MutexGuard<'_, Shutdown> {
        self.round.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Asks every connection to close, then waits for live connections on
/// every worker loop to reach zero, bounded by `timeout`.
pub struct WaitForIdle {
    metrics: Arc<dyn EventLoopMetrics>,
    loops: usize,
    timeout: Duration,
    trigger: Arc<DrainTrigger>,
}

impl WaitForIdle {
    const POLL: Duration = Duration::from_millis(100);

    pub fn new(
        metrics: Arc<dyn EventLoopMetrics>,
        loops: usize,
        timeout: Duration,
        trigger: Arc<DrainTrigger>,
    ) -> Self {
        Self {
            metrics,
            loops,
            timeout,
            trigger,
        }
    }

    fn active(&self) -> usize {
        (0..self.loops).map(|index| self.metrics.active_connections(index)).sum()
    }
}

impl ConnectionDrainer for WaitForIdle {
    fn drain_all(&self) {
        let deadline = Instant::now() + self.timeout;
        self.trigger.trigger();

        let mut active = self.active();
        if active == 0 {
            return;
        }

        tracing::info!(active_connections = active, "Waiting for connections to drain");
        while active > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(active_connections = active, "Drain timeout reached, continuing shutdown");
                return;
            }
            std::thread::sleep(Self::POLL);
            active = self.active();
        }
        tracing::info!("All connections drained");
    }
}
