//! Structured logging setup.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - JSON output for log shipping, pretty output for terminals

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(&config.log_level));

    match config.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_thread_names(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true).with_current_span(false))
            .try_init(),
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
