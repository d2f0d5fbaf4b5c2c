//! Metrics exposition.
//!
//! # Metrics
//! - `server_event_loop_threads{pool}` (gauge): loops per pool, set once pools exist
//! - `server_active_connections{event_loop}` (gauge): live connections per worker loop
//! - `server_connections_accepted_total` (counter): connections handed to workers

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `address`.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(address).install()?;
    tracing::info!(address = %address, "Metrics endpoint listening");
    Ok(())
}
