//! Event loop pool subsystem.
//!
//! # Data Flow
//! ```text
//! TransportKind + EventLoopConfig
//!     → manager.rs (build acceptor + worker groups)
//!     → hook.rs (post-creation instrumentation)
//!     → transport-specific socket options (epoll only)
//!
//! Accepted connection
//!     → chooser picks a worker loop:
//!         - round_robin.rs (rotate through loops)
//!         - least_conn.rs (fewest live connections, ties by rotation)
//!     → group.rs (hand task to that loop's thread)
//!     → metrics.rs (count until the connection task ends)
//! ```
//!
//! # Design Decisions
//! - One OS thread per loop, each with its own current-thread runtime
//! - Acceptor pool always rotates; only the worker pool's strategy is pluggable
//! - Connection counts live outside the chooser so any collaborator can supply them

pub mod group;
pub mod hook;
pub mod least_conn;
pub mod manager;
pub mod metrics;
pub mod round_robin;

pub use group::{EventLoopGroup, LoopContext};
pub use hook::{MetricsPoolHook, PoolCreationHook};
pub use manager::{EventLoopPoolManager, EventLoopPools};
pub use metrics::{ConnectionCounters, EventLoopMetrics};

/// Strategy for picking the loop that receives the next task.
pub trait EventLoopChooser: Send + Sync {
    /// Index in `0..loops`.
    fn next_loop(&self, loops: usize, metrics: &dyn EventLoopMetrics) -> usize;
}
