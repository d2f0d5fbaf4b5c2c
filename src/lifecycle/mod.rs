//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! start (server.rs):
//!     TransportSelector → EventLoopPoolManager → ListenerBinder
//!     → coordinator.rs commits Running → optional wait until listeners close
//!
//! stop (server.rs or signals.rs exit hook):
//!     coordinator.rs claims the stop once
//!     → close listeners → status DOWN (status.rs) → drain (drain.rs)
//!     → shut pools → bounded termination wait → unregister exit hook → Stopped
//! ```
//!
//! # Design Decisions
//! - A single lock guards state; stop work runs outside it
//! - Status, draining and exit hooks are traits so callers can plug in
//!   their discovery client and connection draining
//! - Shutdown-path failures are logged, never returned

pub mod coordinator;
pub mod drain;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod status;

pub use coordinator::{ServerState, ShutdownCoordinator};
pub use drain::{ConnectionDrainer, DrainTrigger, WaitForIdle};
pub use server::{ServerLifecycle, ServerLifecycleBuilder};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{ExitCallback, ExitHook, HookError, SignalExitHook};
pub use status::{InstanceStatus, LocalStatus, StatusRegistry};
