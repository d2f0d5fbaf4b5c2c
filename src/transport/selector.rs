//! Transport selection with graceful fallback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::transport::kind::TransportKind;
use crate::transport::probe::{NativeTransport, PlatformProbe, TransportProbe};

/// Candidates in preference order.
const NATIVE_PREFERENCE: [NativeTransport; 2] = [NativeTransport::Epoll, NativeTransport::Kqueue];

/// Picks the transport for a server instance.
#[derive(Clone)]
pub struct TransportSelector {
    probe: Arc<dyn TransportProbe>,
}

impl TransportSelector {
    pub fn new(probe: Arc<dyn TransportProbe>) -> Self {
        Self { probe }
    }

    /// Epoll, then kqueue, then portable. `force_portable` skips probing.
    ///
    /// Never fails: a probe that errors or panics counts as unavailable.
    pub fn select(&self, force_portable: bool) -> TransportKind {
        if force_portable {
            tracing::info!("Portable transport forced by configuration");
            return TransportKind::Portable;
        }

        NATIVE_PREFERENCE
            .iter()
            .copied()
            .find(|candidate| self.available(*candidate))
            .map(|native| native.kind())
            .unwrap_or(TransportKind::Portable)
    }

    fn available(&self, transport: NativeTransport) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.probe.probe(transport))) {
            Ok(Ok(())) => true,
            Ok(Err(cause)) => {
                tracing::debug!(transport = ?transport, %cause, "Native transport unavailable, skipping");
                false
            }
            Err(_) => {
                tracing::warn!(transport = ?transport, "Native transport probe panicked, skipping");
                false
            }
        }
    }
}

impl Default for TransportSelector {
    fn default() -> Self {
        Self::new(Arc::new(PlatformProbe))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::transport::probe::ProbeError;

    enum Outcome {
        Available,
        Unavailable,
        Panics,
    }

    struct FakeProbe {
        epoll: Outcome,
        kqueue: Outcome,
        calls: Mutex<Vec<NativeTransport>>,
    }

    impl FakeProbe {
        fn new(epoll: Outcome, kqueue: Outcome) -> Arc<Self> {
            Arc::new(Self {
                epoll,
                kqueue,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransportProbe for FakeProbe {
        fn probe(&self, transport: NativeTransport) -> Result<(), ProbeError> {
            self.calls.lock().unwrap().push(transport);
            let outcome = match transport {
                NativeTransport::Epoll => &self.epoll,
                NativeTransport::Kqueue => &self.kqueue,
            };
            match outcome {
                Outcome::Available => Ok(()),
                Outcome::Unavailable => Err(ProbeError::Unsupported { transport, os: "test" }),
                Outcome::Panics => panic!("native library failed to load"),
            }
        }
    }

    #[test]
    fn force_portable_never_probes() {
        let probe = FakeProbe::new(Outcome::Available, Outcome::Available);
        let selector = TransportSelector::new(probe.clone());
        assert_eq!(selector.select(true), TransportKind::Portable);
        assert!(probe.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn epoll_wins_without_probing_kqueue() {
        let probe = FakeProbe::new(Outcome::Available, Outcome::Available);
        let selector = TransportSelector::new(probe.clone());
        assert_eq!(selector.select(false), TransportKind::NativeEpoll);
        assert_eq!(*probe.calls.lock().unwrap(), vec![NativeTransport::Epoll]);
    }

    #[test]
    fn panicking_probe_falls_through() {
        let probe = FakeProbe::new(Outcome::Panics, Outcome::Available);
        let selector = TransportSelector::new(probe.clone());
        assert_eq!(selector.select(false), TransportKind::NativeKqueue);

        let probe = FakeProbe::new(Outcome::Unavailable, Outcome::Panics);
        assert_eq!(TransportSelector::new(probe).select(false), TransportKind::Portable);
    }

    #[test]
    fn platform_selection_is_native_where_expected() {
        let kind = TransportSelector::default().select(false);
        if cfg!(target_os = "linux") {
            assert_eq!(kind, TransportKind::NativeEpoll);
        }
        if cfg!(target_os = "macos") {
            assert_eq!(kind, TransportKind::NativeKqueue);
        }
    }
}
