//! Binds every listener in order onto the shared pools.
//!
//! # Responsibilities
//! - Compose the effective socket options (common, then transport-specific)
//! - Announce UP right before the first bind
//! - Bind fail-fast, in caller order, and start an accept loop per socket
//! - Tear down anything already bound when a later bind fails

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServerError;
use crate::event_loop::EventLoopPools;
use crate::lifecycle::drain::DrainTrigger;
use crate::lifecycle::status::{InstanceStatus, StatusRegistry};
use crate::net::accept::AcceptLoop;
use crate::net::connection::ConnectionHandler;
use crate::net::listener::{
    CloseSignal, FireOnDrop, ListenerSpecs, ListeningEndpoint, ListeningEndpoints, SocketBinder, WaitOutcome,
};
use crate::net::options::SocketOptionSet;
use crate::transport::TransportKind;

/// How long an aborted start waits for already-bound sockets to close.
const ABORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ListenerBinder {
    binder: Arc<dyn SocketBinder>,
    status: Arc<dyn StatusRegistry>,
    drain: Arc<DrainTrigger>,
}

impl ListenerBinder {
    /// `drain` supplies the signal each accepted connection's handler watches.
    pub fn new(binder: Arc<dyn SocketBinder>, status: Arc<dyn StatusRegistry>, drain: Arc<DrainTrigger>) -> Self {
        Self { binder, status, drain }
    }

    /// Bind each spec in order and hand its socket to an acceptor loop.
    ///
    /// Stops at the first failure; later specs are never attempted and the
    /// endpoints bound so far are closed before the error is returned.
    pub fn bind_all(
        &self,
        specs: &ListenerSpecs,
        common: &SocketOptionSet,
        pools: &EventLoopPools,
        kind: TransportKind,
    ) -> Result<ListeningEndpoints, ServerError> {
        let options = Arc::new(SocketOptionSet::effective(common, &pools.transport_options));

        tracing::info!(
            server_channel = kind.server_channel(),
            client_channel = kind.client_channel(),
            listeners = specs.len(),
            "Binding listeners"
        );

        if let Err(reason) = options.validate() {
            let address = specs.iter().next().map(|spec| spec.address());
            return match address {
                Some(address) => Err(ServerError::InvalidOptions { address, reason }),
                None => Ok(ListeningEndpoints::default()),
            };
        }

        let mut endpoints = ListeningEndpoints::default();
        for (position, spec) in specs.iter().enumerate() {
            if position == 0 {
                self.status.set_local_status(InstanceStatus::Up);
            }

            match self.bind_one(spec.address(), spec.handler().clone(), &options, pools) {
                Ok(endpoint) => {
                    tracing::info!(address = %endpoint.local_addr(), transport = %kind, "Listener bound");
                    endpoints.push(endpoint);
                }
                Err(e) => {
                    tracing::error!(address = %spec.address(), error = %e, "Failed to bind listener, aborting start");
                    endpoints.close_all(ABORT_CLOSE_TIMEOUT);
                    self.status.set_local_status(InstanceStatus::Down);
                    return Err(e);
                }
            }
        }

        Ok(endpoints)
    }

    fn bind_one(
        &self,
        address: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
        options: &Arc<SocketOptionSet>,
        pools: &EventLoopPools,
    ) -> Result<ListeningEndpoint, ServerError> {
        let bind_err = |source| ServerError::Bind { address, source };

        let listener = self.binder.bind(address, options).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        let (endpoint, close_requested, closed) = ListeningEndpoint::new(local_addr);
        let accept = AcceptLoop {
            listener,
            closed: FireOnDrop(closed),
            close_requested,
            handler,
            workers: pools.workers.clone(),
            options: options.clone(),
            drain: self.drain.clone(),
        };

        match pools.acceptors.spawn(move |cx| accept.run(cx)) {
            Some(_) => Ok(endpoint),
            None => Err(bind_err(io::Error::other("acceptor pool is shut down"))),
        }
    }

    /// Block until every close signal has fired, in order.
    ///
    /// Returns early with [`WaitOutcome::Interrupted`] once `interrupted` is raised.
    pub fn wait_until_closed(signals: &[Arc<CloseSignal>], interrupted: &AtomicBool) -> WaitOutcome {
        for signal in signals {
            if signal.wait(interrupted) == WaitOutcome::Interrupted {
                return WaitOutcome::Interrupted;
            }
        }
        WaitOutcome::Closed
    }
}
