//! Transport selection subsystem.
//!
//! # Data Flow
//! ```text
//! force_portable? ──yes──▶ Portable
//!       │no
//!       ▼
//! probe epoll ──ok──▶ NativeEpoll
//!       │unavailable / error / panic (logged, swallowed)
//!       ▼
//! probe kqueue ──ok──▶ NativeKqueue
//!       │unavailable / error / panic
//!       ▼
//!   Portable
//! ```
//!
//! # Design Decisions
//! - Ordering is fixed: epoll over kqueue over portable
//! - Probing can never fail the process

pub mod kind;
pub mod probe;
pub mod selector;

pub use kind::TransportKind;
pub use probe::{NativeTransport, PlatformProbe, ProbeError, TransportProbe};
pub use selector::TransportSelector;
