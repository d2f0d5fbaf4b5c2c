//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle, binder, event loops produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (gauges/counters through the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (binary only, opt-in)
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing subscribers and recorders is the binary's job
//! - Without a recorder installed, metric updates are no-ops

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
