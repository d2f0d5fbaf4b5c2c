//! Native transport capability probing.
//!
//! # Responsibilities
//! - Report whether a native poller can be used on this host
//! - Carry the reason when it cannot
//!
//! # Design Decisions
//! - Probes are a trait so selection can be exercised with fakes
//! - The platform probe checks compile-time OS support first, then proves
//!   the poller works by standing up an I/O driver

use std::io;

use crate::transport::kind::TransportKind;

/// A native transport that can be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTransport {
    Epoll,
    Kqueue,
}

impl NativeTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            NativeTransport::Epoll => TransportKind::NativeEpoll,
            NativeTransport::Kqueue => TransportKind::NativeKqueue,
        }
    }
}

/// Why a native transport is unavailable.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Not supported on this operating system.
    #[error("{transport:?} is not supported on {os}")]
    Unsupported {
        transport: NativeTransport,
        os: &'static str,
    },

    /// Supported in principle, but the poller could not be created.
    #[error("{transport:?} poller could not be created: {source}")]
    Driver {
        transport: NativeTransport,
        #[source]
        source: io::Error,
    },
}

/// Capability probe for native transports.
///
/// `Ok(())` means available. Implementations may also panic; the selector
/// treats that as unavailable too.
pub trait TransportProbe: Send + Sync {
    fn probe(&self, transport: NativeTransport) -> Result<(), ProbeError>;
}

/// Probe backed by the host operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformProbe;

impl PlatformProbe {
    fn supported(transport: NativeTransport) -> bool {
        match transport {
            NativeTransport::Epoll => cfg!(any(target_os = "linux", target_os = "android")),
            NativeTransport::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )),
        }
    }
}

impl TransportProbe for PlatformProbe {
    fn probe(&self, transport: NativeTransport) -> Result<(), ProbeError> {
        if !Self::supported(transport) {
            return Err(ProbeError::Unsupported {
                transport,
                os: std::env::consts::OS,
            });
        }

        // The I/O driver is backed by the native poller on supported targets.
        tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map(drop)
            .map_err(|source| ProbeError::Driver { transport, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_native_transport_per_platform() {
        let probe = PlatformProbe;
        let epoll = probe.probe(NativeTransport::Epoll).is_ok();
        let kqueue = probe.probe(NativeTransport::Kqueue).is_ok();
        assert!(!(epoll && kqueue));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn epoll_available_on_linux() {
        assert!(PlatformProbe.probe(NativeTransport::Epoll).is_ok());
        assert!(matches!(
            PlatformProbe.probe(NativeTransport::Kqueue),
            Err(ProbeError::Unsupported { os: "linux", .. })
        ));
    }
}
