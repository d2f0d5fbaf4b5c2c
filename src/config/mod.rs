//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → handed to ServerLifecycle at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new value takes effect on the next instance
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::EventLoopConfig;
pub use schema::ListenerConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::ServerConfig;
pub use schema::ShutdownConfig;
pub use schema::TransportConfig;
pub use schema::WorkerAssignment;
