//! Portico server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────────┐
//!                │                  ServerLifecycle                 │
//!                │                                                  │
//!   start ──────▶│  TransportSelector ─▶ EventLoopPoolManager       │
//!                │         │                    │                   │
//!                │         ▼                    ▼                   │
//!                │   TransportKind     acceptor + worker loops      │
//!                │                              │                   │
//!                │                              ▼                   │
//!                │                       ListenerBinder ──▶ UP      │
//!                │                              │                   │
//!   clients ────▶│             accept loop ─▶ worker loop ─▶ handler│
//!                │                                                  │
//!   stop / ─────▶│  ShutdownCoordinator: close ─▶ DOWN ─▶ drain     │
//!   SIGTERM      │                       ─▶ pools ─▶ Stopped        │
//!                └──────────────────────────────────────────────────┘
//! ```
//!
//! Every configured listener runs a line echo handler; the binary is a
//! runnable harness for the lifecycle, not a protocol server.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use portico::config::{loader::load_config, ServerConfig};
use portico::lifecycle::ShutdownSignal;
use portico::net::ListenerSpecs;
use portico::observability::{init_logging, init_metrics};
use portico::ServerLifecycle;

#[derive(Parser, Debug)]
#[command(name = "portico", version, about = "Run a server with managed lifecycle")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the portable transport even where a native one is available
    #[arg(long)]
    force_portable: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    config.transport.force_portable |= cli.force_portable;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portico starting");

    if config.observability.metrics_enabled {
        let address: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(address)?;
    }

    let mut specs = ListenerSpecs::new();
    for listener in &config.listeners {
        specs = specs.with(listener.address.parse()?, echo);
    }
    if specs.is_empty() {
        tracing::warn!("No listeners configured, nothing to serve");
    }

    tracing::info!(
        name = %config.name,
        acceptor_threads = config.event_loops.acceptor_threads,
        worker_threads = config.event_loops.worker_threads,
        listeners = specs.len(),
        "Configuration loaded"
    );

    let stop_timeout = config.shutdown.termination_timeout() * 3;
    let server = ServerLifecycle::builder(config, specs).build();
    server.start(true)?;

    // Listeners closed, either by the exit hook or because none were bound.
    server.stop();
    if !server.await_stopped(stop_timeout) {
        tracing::warn!("Stop sequence did not finish in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Echo each line back to the peer until it hangs up or the server drains.
async fn echo(stream: TcpStream, peer: SocketAddr, mut drain: ShutdownSignal) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = drain.recv() => {
                tracing::debug!(peer = %peer, "Closing connection for drain");
                break;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Read error");
                break;
            }
        }
    }
}
