//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread counts and timeouts > 0)
//! - Reject unparsable or duplicate listener addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("event_loops.acceptor_threads must be at least 1")]
    NoAcceptorThreads,

    #[error("event_loops.worker_threads must be at least 1")]
    NoWorkerThreads,

    #[error("shutdown.termination_timeout_secs must be at least 1")]
    ZeroTerminationTimeout,

    #[error("listener address `{0}` is not a socket address")]
    InvalidListenerAddress(String),

    #[error("listener address `{0}` is configured more than once")]
    DuplicateListenerAddress(SocketAddr),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.event_loops.acceptor_threads == 0 {
        errors.push(ValidationError::NoAcceptorThreads);
    }
    if config.event_loops.worker_threads == 0 {
        errors.push(ValidationError::NoWorkerThreads);
    }
    if config.shutdown.termination_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTerminationTimeout);
    }

    let mut seen = HashSet::new();
    for listener in &config.listeners {
        match listener.address.parse::<SocketAddr>() {
            Ok(addr) => {
                if !seen.insert(addr) {
                    errors.push(ValidationError::DuplicateListenerAddress(addr));
                }
            }
            Err(_) => errors.push(ValidationError::InvalidListenerAddress(listener.address.clone())),
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
